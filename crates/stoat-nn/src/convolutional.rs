use stoat_core::{
    bail, output_side, Activation, CudaContext, Error, Format, Result, RngContext, Tensor,
    TensorView,
};

// Convolutional layer
//
// A set of square kernels slides over the input with a fixed stride; each
// kernel produces one output depth slice via valid cross-correlation, gets
// its scalar bias added across that slice, and the activation function is
// applied to the whole tensor.
//
// Kernel weight tensors are (k, k, input_depth) — their depth is only known
// once the input format is bound, so kernels are allocated at bind time and
// re-allocated if the layer is ever bound again. The per-kernel biases are
// packed into one (1, 1, kernel_count) tensor so the forward pass is a
// single per-depth broadcast add.

pub struct Convolutional {
    kernel_count: usize,
    kernel_size: usize,
    stride: usize,
    activation: Activation,
    kernels: Vec<Tensor>,
    kernel_deltas: Vec<Tensor>,
    biases: Tensor,
    bias_deltas: Tensor,
}

impl Convolutional {
    pub fn new(
        kernel_count: usize,
        kernel_size: usize,
        stride: usize,
        activation: Activation,
    ) -> Result<Self> {
        if kernel_count == 0 {
            return Err(Error::InvalidHyperparameter(
                "kernel count must be greater than 0".into(),
            ));
        }
        if kernel_size == 0 {
            return Err(Error::InvalidHyperparameter(
                "kernel size must be greater than 0".into(),
            ));
        }
        if stride == 0 {
            return Err(Error::InvalidHyperparameter(
                "stride must be greater than 0".into(),
            ));
        }
        if stride > kernel_size {
            return Err(Error::InvalidHyperparameter(format!(
                "stride {stride} must not exceed the kernel size {kernel_size}"
            )));
        }
        Ok(Convolutional {
            kernel_count,
            kernel_size,
            stride,
            activation,
            kernels: Vec::new(),
            kernel_deltas: Vec::new(),
            biases: Tensor::zeros((1, 1, kernel_count))?,
            bias_deltas: Tensor::zeros((1, 1, kernel_count))?,
        })
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn kernels(&self) -> &[Tensor] {
        &self.kernels
    }

    pub fn kernels_mut(&mut self) -> &mut [Tensor] {
        &mut self.kernels
    }

    pub fn biases(&self) -> &Tensor {
        &self.biases
    }

    /// Size the kernels for the input depth and compute the output format.
    /// Fails when the stride/size pair does not tile the input resolution.
    pub(crate) fn bind_input(&mut self, input_format: Format) -> Result<Format> {
        let out_w = output_side(input_format.width(), self.kernel_size, self.stride)?;
        let out_h = output_side(input_format.height(), self.kernel_size, self.stride)?;
        let kernel_format = Format::new(self.kernel_size, self.kernel_size, input_format.depth());
        self.kernels = (0..self.kernel_count)
            .map(|_| Tensor::zeros(kernel_format))
            .collect::<Result<_>>()?;
        self.kernel_deltas = (0..self.kernel_count)
            .map(|_| Tensor::zeros(kernel_format))
            .collect::<Result<_>>()?;
        Ok(Format::new(out_w, out_h, self.kernel_count))
    }

    fn check_bound(&self) -> Result<()> {
        if self.kernels.is_empty() {
            return Err(Error::Uninitialized("convolutional input format not bound"));
        }
        Ok(())
    }

    pub(crate) fn forward(&self, activations: &mut Tensor, input: &TensorView<'_>) -> Result<()> {
        self.check_bound()?;
        activations.set_all(0.0)?;
        activations.fill_cross_correlation(input, &self.kernels, self.stride)?;
        activations.add_per_depth(&self.biases)?;
        activations.apply_activation(self.activation)
    }

    /// Convolution gradient, derived from the forward contract.
    ///
    /// Per output element the error slot is read and zeroed, the local
    /// gradient is recovered through the activation's inverse/derivative,
    /// and then: the kernel bias collects the plain gradient, each kernel
    /// weight collects gradient × the input value it saw, and the
    /// predecessor error collects gradient × weight at every input position
    /// the window covered.
    pub(crate) fn backward(
        &mut self,
        activations: &Tensor,
        error: &mut Tensor,
        input: &TensorView<'_>,
        mut passing_error: Option<&mut Tensor>,
    ) -> Result<()> {
        self.check_bound()?;
        let act = self.activation;
        let out_format = activations.format();
        let in_format = input.format();
        let k = self.kernel_size;
        let stride = self.stride;

        let acts = activations.as_slice()?;
        let err = error.as_mut_slice()?;
        let input_values = input.as_slice()?;
        let bias_deltas = self.bias_deltas.as_mut_slice()?;

        for (kernel_idx, (kernel, deltas)) in self
            .kernels
            .iter()
            .zip(self.kernel_deltas.iter_mut())
            .enumerate()
        {
            let weights = kernel.as_slice()?;
            let weight_deltas = deltas.as_mut_slice()?;

            for y in 0..out_format.height() {
                for x in 0..out_format.width() {
                    let out_idx = out_format.index_of(x, y, kernel_idx);
                    let error_value = err[out_idx];
                    err[out_idx] = 0.0;

                    let pre_activation = act.inverse(acts[out_idx]);
                    let local = error_value * act.derivative(pre_activation);
                    bias_deltas[kernel_idx] += local;

                    for dz in 0..in_format.depth() {
                        for dy in 0..k {
                            for dx in 0..k {
                                let in_idx =
                                    in_format.index_of(x * stride + dx, y * stride + dy, dz);
                                let k_idx = dx + dy * k + dz * k * k;
                                weight_deltas[k_idx] += local * input_values[in_idx];
                                if let Some(pe) = passing_error.as_deref_mut() {
                                    pe.add_at_flat(in_idx, local * weights[k_idx])?;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn apply_deltas(&mut self, batch_count: usize, learning_rate: f32) -> Result<()> {
        if batch_count == 0 {
            bail!("cannot apply deltas for an empty batch");
        }
        self.check_bound()?;
        let n = batch_count as f32;

        let biases = self.biases.as_mut_slice()?;
        let bias_deltas = self.bias_deltas.as_mut_slice()?;
        for (b, d) in biases.iter_mut().zip(bias_deltas.iter_mut()) {
            *b -= (*d / n) * learning_rate;
            *d = 0.0;
        }

        for (kernel, deltas) in self.kernels.iter_mut().zip(self.kernel_deltas.iter_mut()) {
            let weights = kernel.as_mut_slice()?;
            let weight_deltas = deltas.as_mut_slice()?;
            for (w, d) in weights.iter_mut().zip(weight_deltas.iter_mut()) {
                *w -= (*d / n) * learning_rate;
                *d = 0.0;
            }
        }
        Ok(())
    }

    pub(crate) fn set_all_parameter(&mut self, value: f32) -> Result<()> {
        self.check_bound()?;
        for kernel in &mut self.kernels {
            kernel.set_all(value)?;
        }
        self.biases.set_all(value)
    }

    pub(crate) fn apply_noise(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        self.check_bound()?;
        for kernel in &mut self.kernels {
            kernel.apply_noise(rng, range)?;
        }
        self.biases.apply_noise(rng, range)
    }

    /// Pick one kernel uniformly, then one of its weights — or its scalar
    /// bias, with odds 1 : weight_count.
    pub(crate) fn mutate(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        self.check_bound()?;
        let kernel_idx = rng.index(self.kernels.len());
        let weight_count = self.kernels[kernel_idx].item_count() as f32;
        if rng.biased_coin(weight_count, 1.0) {
            self.kernels[kernel_idx].mutate(rng, range)
        } else {
            let nudge = rng.uniform(-range, range);
            self.biases.add_at_flat(kernel_idx, nudge)
        }
    }

    pub(crate) fn enable_device(&mut self, ctx: &CudaContext) -> Result<()> {
        self.check_bound()?;
        for kernel in &mut self.kernels {
            kernel.to_device(ctx)?;
        }
        self.biases.to_device(ctx)
    }

    pub(crate) fn disable_device(&mut self) -> Result<()> {
        for kernel in &mut self.kernels {
            kernel.to_host()?;
        }
        self.biases.to_host()
    }
}
