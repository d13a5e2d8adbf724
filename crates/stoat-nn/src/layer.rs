use stoat_core::{
    Activation, CudaContext, Error, Format, PoolKind, Result, RngContext, Tensor, TensorView,
};

use crate::convolutional::Convolutional;
use crate::fully_connected::FullyConnected;
use crate::pooling::Pooling;

// Layer — one unit of the chain
//
// Every layer owns an activation tensor and an error tensor of the same
// format; the error tensor is backprop scratch, zeroed slot by slot as it is
// consumed so one example never leaks into the next. Variant-specific state
// (weights, kernels, pooling configuration) lives in the LayerKind.
//
// Layers hold no reference to their predecessor. The network addresses
// layers by index and passes the predecessor's activation view and error
// tensor into back_propagation, so the owning Vec can grow and move freely.
//
// Activations and error are allocated when the input format is bound
// (at add_layer time); touching an unbound layer fails `Uninitialized`.

/// The variant-specific behavior of a [`Layer`].
pub enum LayerKind {
    FullyConnected(FullyConnected),
    Convolutional(Convolutional),
    Pooling(Pooling),
}

/// One layer of the network: shared activation/error state plus its variant.
pub struct Layer {
    activations: Option<Tensor>,
    error: Option<Tensor>,
    input_format: Option<Format>,
    kind: LayerKind,
}

impl Layer {
    fn with_kind(kind: LayerKind) -> Self {
        Layer {
            activations: None,
            error: None,
            input_format: None,
            kind,
        }
    }

    /// A fully-connected layer of `neurons` units.
    pub fn fully_connected(neurons: usize, activation: Activation) -> Result<Self> {
        Ok(Self::with_kind(LayerKind::FullyConnected(
            FullyConnected::new(neurons, activation)?,
        )))
    }

    /// A fully-connected layer with an explicit activation format (the
    /// output layer takes the network's output format).
    pub fn fully_connected_with_format(format: Format, activation: Activation) -> Result<Self> {
        Ok(Self::with_kind(LayerKind::FullyConnected(
            FullyConnected::with_format(format, activation)?,
        )))
    }

    /// A convolutional layer. Validates its hyperparameters up front.
    pub fn convolutional(
        kernel_count: usize,
        kernel_size: usize,
        stride: usize,
        activation: Activation,
    ) -> Result<Self> {
        Ok(Self::with_kind(LayerKind::Convolutional(
            Convolutional::new(kernel_count, kernel_size, stride, activation)?,
        )))
    }

    /// A pooling layer. Carries no trainable parameters.
    pub fn pooling(filter_size: usize, stride: usize, kind: PoolKind) -> Result<Self> {
        Ok(Self::with_kind(LayerKind::Pooling(Pooling::new(
            filter_size,
            stride,
            kind,
        )?)))
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut LayerKind {
        &mut self.kind
    }

    /// Whether this layer carries trainable parameters.
    pub fn is_parameter_layer(&self) -> bool {
        !matches!(self.kind, LayerKind::Pooling(_))
    }

    /// Bind the input format: validates it against the variant's shape
    /// algebra and allocates the activation and error tensors.
    pub fn set_input_format(&mut self, input_format: Format) -> Result<()> {
        let out_format = match &mut self.kind {
            LayerKind::FullyConnected(fc) => {
                fc.bind_input(input_format)?;
                fc.activation_format()
            }
            LayerKind::Convolutional(conv) => conv.bind_input(input_format)?,
            LayerKind::Pooling(pool) => pool.bind_input(input_format)?,
        };
        self.activations = Some(Tensor::zeros(out_format)?);
        self.error = Some(Tensor::zeros(out_format)?);
        self.input_format = Some(input_format);
        Ok(())
    }

    pub fn input_format(&self) -> Result<Format> {
        self.input_format
            .ok_or(Error::Uninitialized("layer input format not bound"))
    }

    pub fn activation_format(&self) -> Result<Format> {
        Ok(self.activations()?.format())
    }

    pub fn activations(&self) -> Result<&Tensor> {
        self.activations
            .as_ref()
            .ok_or(Error::Uninitialized("layer input format not bound"))
    }

    pub fn error(&self) -> Result<&Tensor> {
        self.error
            .as_ref()
            .ok_or(Error::Uninitialized("layer input format not bound"))
    }

    /// The activation tensor together with the mutable error tensor — what a
    /// successor needs to backpropagate into this layer.
    pub(crate) fn activation_and_error_mut(&mut self) -> Result<(&Tensor, &mut Tensor)> {
        match (&self.activations, &mut self.error) {
            (Some(a), Some(e)) => Ok((a, e)),
            _ => Err(Error::Uninitialized("layer input format not bound")),
        }
    }

    /// Compute this layer's activations from the predecessor's.
    pub fn forward_propagation(&mut self, input: &TensorView<'_>) -> Result<()> {
        let expected = self
            .input_format
            .ok_or(Error::Uninitialized("layer input format not bound"))?;
        if input.format() != expected {
            return Err(Error::FormatMismatch {
                expected,
                got: input.format(),
            });
        }
        let activations = self
            .activations
            .as_mut()
            .ok_or(Error::Uninitialized("layer input format not bound"))?;
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => fc.forward(activations, input),
            LayerKind::Convolutional(conv) => conv.forward(activations, input),
            LayerKind::Pooling(pool) => pool.forward(activations, input),
        }
    }

    /// Consume this layer's accumulated error: collect parameter deltas and
    /// push the remaining error into the predecessor's error tensor (absent
    /// for the first layer).
    pub fn back_propagation(
        &mut self,
        input: &TensorView<'_>,
        passing_error: Option<&mut Tensor>,
    ) -> Result<()> {
        let activations = self
            .activations
            .as_ref()
            .ok_or(Error::Uninitialized("layer input format not bound"))?;
        let error = self
            .error
            .as_mut()
            .ok_or(Error::Uninitialized("layer input format not bound"))?;
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => {
                fc.backward(activations, error, input, passing_error)
            }
            LayerKind::Convolutional(conv) => {
                conv.backward(activations, error, input, passing_error)
            }
            LayerKind::Pooling(pool) => pool.backward(error, input, passing_error),
        }
    }

    /// Seed the error from a label: the derivative of the squared-error cost,
    /// `2 · (activation − label)` per element. Only meaningful on the last
    /// layer.
    pub fn set_error_from_label(&mut self, label: &TensorView<'_>) -> Result<()> {
        let activations = self
            .activations
            .as_ref()
            .ok_or(Error::Uninitialized("layer input format not bound"))?;
        if label.format() != activations.format() {
            return Err(Error::FormatMismatch {
                expected: activations.format(),
                got: label.format(),
            });
        }
        let acts = activations.as_slice()?;
        let labels = label.as_slice()?;
        let error = self
            .error
            .as_mut()
            .ok_or(Error::Uninitialized("layer input format not bound"))?;
        let err = error.as_mut_slice()?;
        for i in 0..err.len() {
            err[i] = 2.0 * (acts[i] - labels[i]);
        }
        Ok(())
    }

    /// Average the accumulated deltas over the batch and step the parameters.
    pub fn apply_deltas(&mut self, batch_count: usize, learning_rate: f32) -> Result<()> {
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => fc.apply_deltas(batch_count, learning_rate),
            LayerKind::Convolutional(conv) => conv.apply_deltas(batch_count, learning_rate),
            LayerKind::Pooling(_) => Ok(()),
        }
    }

    pub fn set_all_parameter(&mut self, value: f32) -> Result<()> {
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => fc.set_all_parameter(value),
            LayerKind::Convolutional(conv) => conv.set_all_parameter(value),
            LayerKind::Pooling(_) => Ok(()),
        }
    }

    pub fn apply_noise(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => fc.apply_noise(rng, range),
            LayerKind::Convolutional(conv) => conv.apply_noise(rng, range),
            LayerKind::Pooling(_) => Ok(()),
        }
    }

    pub fn mutate(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => fc.mutate(rng, range),
            LayerKind::Convolutional(conv) => conv.mutate(rng, range),
            LayerKind::Pooling(_) => Ok(()),
        }
    }

    /// Move the forward-path tensors (activations, weights, biases) into
    /// device memory. Delta accumulators and the error tensor stay on the
    /// host; backpropagation is a host pass.
    pub fn enable_device(&mut self, ctx: &CudaContext) -> Result<()> {
        if let Some(acts) = self.activations.as_mut() {
            acts.to_device(ctx)?;
        }
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => fc.enable_device(ctx),
            LayerKind::Convolutional(conv) => conv.enable_device(ctx),
            LayerKind::Pooling(_) => Ok(()),
        }
    }

    /// Move everything back into host memory.
    pub fn disable_device(&mut self) -> Result<()> {
        if let Some(acts) = self.activations.as_mut() {
            acts.to_host()?;
        }
        match &mut self.kind {
            LayerKind::FullyConnected(fc) => fc.disable_device(),
            LayerKind::Convolutional(conv) => conv.disable_device(),
            LayerKind::Pooling(_) => Ok(()),
        }
    }
}
