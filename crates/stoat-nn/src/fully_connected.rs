use stoat_core::{
    bail, Activation, CudaContext, Error, Format, Result, RngContext, Tensor, TensorView,
};

// Fully-connected layer
//
// activations = f( W·input + b )
//
// The weight tensor is (input_count, neuron_count, 1): the weight connecting
// input j to neuron i sits at flat index j + i·input_count. Biases share the
// activation format. Both carry a delta accumulator that collects gradient
// contributions across a batch until `apply_deltas` averages and applies
// them.
//
// Weights depend on the input format and are allocated when the layer is
// bound into a network; biases exist from construction.

pub struct FullyConnected {
    neuron_format: Format,
    activation: Activation,
    weights: Option<Tensor>,
    weight_deltas: Option<Tensor>,
    biases: Tensor,
    bias_deltas: Tensor,
}

impl FullyConnected {
    /// A layer of `neurons` units in the column shape `(1, n, 1)`.
    pub fn new(neurons: usize, activation: Activation) -> Result<Self> {
        Self::with_format(Format::column(neurons), activation)
    }

    /// A layer whose activations take an explicit format (used for the output
    /// layer, whose shape is the network's output format).
    pub fn with_format(neuron_format: Format, activation: Activation) -> Result<Self> {
        if neuron_format.item_count() == 0 {
            return Err(Error::InvalidHyperparameter(format!(
                "fully-connected layer format {neuron_format} has no neurons"
            )));
        }
        Ok(FullyConnected {
            neuron_format,
            activation,
            weights: None,
            weight_deltas: None,
            biases: Tensor::zeros(neuron_format)?,
            bias_deltas: Tensor::zeros(neuron_format)?,
        })
    }

    pub fn activation_format(&self) -> Format {
        self.neuron_format
    }

    /// Allocate weights for the given input format.
    pub(crate) fn bind_input(&mut self, input_format: Format) -> Result<()> {
        let weight_format = Format::new(input_format.item_count(), self.neuron_format.item_count(), 1);
        self.weights = Some(Tensor::zeros(weight_format)?);
        self.weight_deltas = Some(Tensor::zeros(weight_format)?);
        Ok(())
    }

    fn weights_bound(&self) -> Result<&Tensor> {
        self.weights
            .as_ref()
            .ok_or(Error::Uninitialized("fully-connected input format not bound"))
    }

    pub fn weights(&self) -> Result<&Tensor> {
        self.weights_bound()
    }

    pub fn weights_mut(&mut self) -> Result<&mut Tensor> {
        self.weights
            .as_mut()
            .ok_or(Error::Uninitialized("fully-connected input format not bound"))
    }

    pub fn biases(&self) -> &Tensor {
        &self.biases
    }

    pub fn biases_mut(&mut self) -> &mut Tensor {
        &mut self.biases
    }

    pub fn weight_deltas(&self) -> Result<&Tensor> {
        self.weight_deltas
            .as_ref()
            .ok_or(Error::Uninitialized("fully-connected input format not bound"))
    }

    pub fn bias_deltas(&self) -> &Tensor {
        &self.bias_deltas
    }

    pub(crate) fn forward(&self, activations: &mut Tensor, input: &TensorView<'_>) -> Result<()> {
        activations.fill_dot_product(self.weights_bound()?, input)?;
        activations.add_assign(&self.biases)?;
        activations.apply_activation(self.activation)
    }

    /// Standard backpropagation without an autograd tape.
    ///
    /// Reads and zeroes each neuron's error slot (one example's error must
    /// not leak into the next), recovers the pre-activation through the
    /// activation's inverse, accumulates bias and weight deltas, and feeds
    /// the error back to the predecessor (accumulated, not overwritten,
    /// since every neuron fans back into the same inputs).
    pub(crate) fn backward(
        &mut self,
        activations: &Tensor,
        error: &mut Tensor,
        input: &TensorView<'_>,
        passing_error: Option<&mut Tensor>,
    ) -> Result<()> {
        let act = self.activation;
        let acts = activations.as_slice()?;
        let err = error.as_mut_slice()?;
        let input_values = input.as_slice()?;
        let weights = self
            .weights
            .as_ref()
            .ok_or(Error::Uninitialized("fully-connected input format not bound"))?
            .as_slice()?;
        let weight_deltas = self
            .weight_deltas
            .as_mut()
            .ok_or(Error::Uninitialized("fully-connected input format not bound"))?
            .as_mut_slice()?;
        let bias_deltas = self.bias_deltas.as_mut_slice()?;
        let mut passing = match passing_error {
            Some(t) => Some(t.as_mut_slice()?),
            None => None,
        };

        let input_count = input_values.len();
        for (i, slot) in err.iter_mut().enumerate() {
            let error_value = *slot;
            *slot = 0.0;

            let pre_activation = act.inverse(acts[i]);
            let derivative = act.derivative(pre_activation);
            let local = error_value * derivative;

            bias_deltas[i] += local;
            for (j, &input_value) in input_values.iter().enumerate() {
                weight_deltas[j + i * input_count] += local * input_value;
                if let Some(pe) = passing.as_deref_mut() {
                    pe[j] += local * weights[j + i * input_count];
                }
            }
        }
        Ok(())
    }

    /// `param -= η · (accumulated / N)`, then the accumulator resets to 0.
    pub(crate) fn apply_deltas(&mut self, batch_count: usize, learning_rate: f32) -> Result<()> {
        if batch_count == 0 {
            bail!("cannot apply deltas for an empty batch");
        }
        let n = batch_count as f32;

        let biases = self.biases.as_mut_slice()?;
        let bias_deltas = self.bias_deltas.as_mut_slice()?;
        for (b, d) in biases.iter_mut().zip(bias_deltas.iter_mut()) {
            *b -= (*d / n) * learning_rate;
            *d = 0.0;
        }

        let weights = self
            .weights
            .as_mut()
            .ok_or(Error::Uninitialized("fully-connected input format not bound"))?
            .as_mut_slice()?;
        let weight_deltas = self
            .weight_deltas
            .as_mut()
            .ok_or(Error::Uninitialized("fully-connected input format not bound"))?
            .as_mut_slice()?;
        for (w, d) in weights.iter_mut().zip(weight_deltas.iter_mut()) {
            *w -= (*d / n) * learning_rate;
            *d = 0.0;
        }
        Ok(())
    }

    pub(crate) fn set_all_parameter(&mut self, value: f32) -> Result<()> {
        self.biases.set_all(value)?;
        self.weights_mut()?.set_all(value)
    }

    pub(crate) fn apply_noise(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        self.biases.apply_noise(rng, range)?;
        self.weights_mut()?.apply_noise(rng, range)
    }

    /// Perturb one scalar: the group is chosen proportionally to its element
    /// count, then one element uniformly inside it.
    pub(crate) fn mutate(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        let weight_count = self.weights_bound()?.item_count() as f32;
        let bias_count = self.biases.item_count() as f32;
        if rng.biased_coin(weight_count, bias_count) {
            self.weights_mut()?.mutate(rng, range)
        } else {
            self.biases.mutate(rng, range)
        }
    }

    pub(crate) fn enable_device(&mut self, ctx: &CudaContext) -> Result<()> {
        self.weights_mut()?.to_device(ctx)?;
        self.biases.to_device(ctx)
    }

    pub(crate) fn disable_device(&mut self) -> Result<()> {
        self.weights_mut()?.to_host()?;
        self.biases.to_host()
    }
}
