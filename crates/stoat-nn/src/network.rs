use std::time::Instant;

use stoat_core::{
    bail, Activation, CudaContext, Error, Format, PoolKind, Result, RngContext, Tensor, TensorView,
};
use stoat_data::Dataset;

use crate::layer::Layer;
use crate::metrics::TestResult;

// Network — the orchestrator
//
// Owns a strictly linear chain of layers. Forward propagation threads each
// layer's activation view into its successor; backpropagation walks the
// chain in reverse, each layer accumulating its deltas and pushing error
// into its predecessor's error tensor. Deltas are averaged and applied once
// per batch.
//
// Lifecycle: set the input format, append layers (each bind validates the
// shape algebra), set the output format before appending the output layer.
// Both formats can be set at most once.

/// Training hyperparameters.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Examples whose deltas are averaged before one parameter update.
    pub batch_size: usize,
    /// Full passes over the training set; the set is reshuffled per epoch.
    pub epochs: usize,
    /// Scale of the per-batch-averaged gradient step.
    pub learning_rate: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            batch_size: 32,
            epochs: 1,
            learning_rate: 0.1,
        }
    }
}

/// An ordered chain of layers with one input and one output format.
#[derive(Default)]
pub struct Network {
    layers: Vec<Layer>,
    input_format: Option<Format>,
    output_format: Option<Format>,
    parameter_layer_indices: Vec<usize>,
}

impl Network {
    pub fn new() -> Self {
        Network::default()
    }

    /// Declare the network input format. Must happen before the first layer
    /// is added and cannot be repeated.
    pub fn set_input_format(&mut self, format: impl Into<Format>) -> Result<()> {
        let format = format.into();
        if self.input_format.is_some() {
            bail!("input format can only be set once");
        }
        if format.item_count() == 0 {
            bail!("input format {} has no elements", format);
        }
        self.input_format = Some(format);
        Ok(())
    }

    /// Declare the network output format. Cannot be repeated; the output
    /// layer added through [`Network::add_output_fully_connected`] takes
    /// this shape.
    pub fn set_output_format(&mut self, format: impl Into<Format>) -> Result<()> {
        let format = format.into();
        if self.output_format.is_some() {
            bail!("output format can only be set once");
        }
        if format.item_count() == 0 {
            bail!("output format {} has no elements", format);
        }
        self.output_format = Some(format);
        Ok(())
    }

    pub fn input_format(&self) -> Result<Format> {
        self.input_format
            .ok_or(Error::Uninitialized("network input format not set"))
    }

    pub fn output_format(&self) -> Result<Format> {
        self.output_format
            .ok_or(Error::Uninitialized("network output format not set"))
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Result<&Layer> {
        self.layers.get(index).ok_or(Error::IndexOutOfRange {
            index,
            count: self.layers.len(),
        })
    }

    pub fn layer_mut(&mut self, index: usize) -> Result<&mut Layer> {
        let count = self.layers.len();
        self.layers
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, count })
    }

    /// Indices of the layers carrying trainable parameters.
    pub fn parameter_layer_indices(&self) -> &[usize] {
        &self.parameter_layer_indices
    }

    /// Append a layer, binding its input format to the previous layer's
    /// activation format (or the network input format for the first layer).
    pub fn add_layer(&mut self, mut layer: Layer) -> Result<()> {
        let input_format = match self.layers.last() {
            Some(prev) => prev.activation_format()?,
            None => self
                .input_format
                .ok_or(Error::Uninitialized("set the input format before adding layers"))?,
        };
        layer.set_input_format(input_format)?;
        if layer.is_parameter_layer() {
            self.parameter_layer_indices.push(self.layers.len());
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn add_fully_connected(&mut self, neurons: usize, activation: Activation) -> Result<()> {
        self.add_layer(Layer::fully_connected(neurons, activation)?)
    }

    /// Append the output layer: a fully-connected layer shaped by the
    /// network output format.
    pub fn add_output_fully_connected(&mut self, activation: Activation) -> Result<()> {
        let format = self.output_format()?;
        self.add_layer(Layer::fully_connected_with_format(format, activation)?)
    }

    pub fn add_convolutional(
        &mut self,
        kernel_count: usize,
        kernel_size: usize,
        stride: usize,
        activation: Activation,
    ) -> Result<()> {
        self.add_layer(Layer::convolutional(
            kernel_count,
            kernel_size,
            stride,
            activation,
        )?)
    }

    pub fn add_pooling(&mut self, filter_size: usize, stride: usize, kind: PoolKind) -> Result<()> {
        self.add_layer(Layer::pooling(filter_size, stride, kind)?)
    }

    /// The last layer's activations: the network output after a forward
    /// pass.
    pub fn output(&self) -> Result<&Tensor> {
        self.layers
            .last()
            .ok_or(Error::Uninitialized("network has no layers"))?
            .activations()
    }

    /// Thread an input through every layer in index order.
    pub fn forward_propagation(&mut self, input: &TensorView<'_>) -> Result<()> {
        let expected = self.input_format()?;
        if input.format() != expected {
            return Err(Error::FormatMismatch {
                expected,
                got: input.format(),
            });
        }
        if self.layers.is_empty() {
            return Err(Error::Uninitialized("network has no layers"));
        }
        for i in 0..self.layers.len() {
            let (before, rest) = self.layers.split_at_mut(i);
            let layer = &mut rest[0];
            match before.last() {
                Some(prev) => layer.forward_propagation(&prev.activations()?.view())?,
                None => layer.forward_propagation(input)?,
            }
        }
        Ok(())
    }

    /// Sum-of-squared-error cost of the current output against a label.
    pub fn cost(&self, label: &TensorView<'_>) -> Result<f32> {
        let output = self.output()?;
        if label.format() != output.format() {
            return Err(Error::FormatMismatch {
                expected: output.format(),
                got: label.format(),
            });
        }
        let actual = output.to_vec()?;
        let expected = label.to_vec()?;
        Ok(actual
            .iter()
            .zip(expected.iter())
            .map(|(a, e)| (a - e) * (a - e))
            .sum())
    }

    /// One forward/backward pass for a single example.
    ///
    /// Seeds the last layer's error from the label and walks the chain in
    /// reverse index order. With `apply_deltas` set the accumulated deltas
    /// are applied immediately (batch of one); training inside a batch
    /// passes `false` and applies per batch instead.
    pub fn learn_once(
        &mut self,
        data: &TensorView<'_>,
        label: &TensorView<'_>,
        apply_deltas: bool,
        learning_rate: f32,
    ) -> Result<()> {
        let output_format = self.output_format()?;
        if label.format() != output_format {
            return Err(Error::FormatMismatch {
                expected: output_format,
                got: label.format(),
            });
        }

        self.forward_propagation(data)?;

        self.layers
            .last_mut()
            .ok_or(Error::Uninitialized("network has no layers"))?
            .set_error_from_label(label)?;

        for i in (0..self.layers.len()).rev() {
            let (before, rest) = self.layers.split_at_mut(i);
            let layer = &mut rest[0];
            match before.last_mut() {
                Some(prev) => {
                    let (prev_activations, prev_error) = prev.activation_and_error_mut()?;
                    layer.back_propagation(&prev_activations.view(), Some(prev_error))?;
                }
                None => layer.back_propagation(data, None)?,
            }
        }

        if apply_deltas {
            self.apply_deltas(1, learning_rate)?;
        }
        Ok(())
    }

    /// Average and apply the accumulated deltas on every parameter layer.
    pub fn apply_deltas(&mut self, batch_count: usize, learning_rate: f32) -> Result<()> {
        for &i in &self.parameter_layer_indices {
            self.layers[i].apply_deltas(batch_count, learning_rate)?;
        }
        Ok(())
    }

    /// Gradient-descent training: per epoch, reshuffle the set, slice it
    /// into batches, accumulate deltas across each batch, and apply them
    /// once per batch (averaged over the examples the batch contains).
    pub fn learn<D: Dataset>(
        &mut self,
        set: &mut D,
        config: &TrainConfig,
        rng: &mut RngContext,
    ) -> Result<()> {
        if config.batch_size == 0 {
            return Err(Error::InvalidHyperparameter(
                "batch size must be greater than 0".into(),
            ));
        }
        if set.is_empty() {
            return Err(Error::Uninitialized("training set is empty"));
        }
        let input_format = self.input_format()?;
        if set.data_format() != input_format {
            return Err(Error::FormatMismatch {
                expected: input_format,
                got: set.data_format(),
            });
        }
        let output_format = self.output_format()?;
        if set.label_format() != output_format {
            return Err(Error::FormatMismatch {
                expected: output_format,
                got: set.label_format(),
            });
        }

        for _ in 0..config.epochs {
            set.shuffle(rng);
            let mut start = 0;
            while start < set.item_count() {
                let end = (start + config.batch_size).min(set.item_count());
                for i in start..end {
                    let data = set.data_at(i)?;
                    let label = set.label_at(i)?;
                    self.learn_once(&data, &label, false, config.learning_rate)?;
                }
                self.apply_deltas(end - start, config.learning_rate)?;
                start = end;
            }
        }
        Ok(())
    }

    /// Set every trainable parameter of every parameter layer.
    pub fn set_all_parameter(&mut self, value: f32) -> Result<()> {
        for &i in &self.parameter_layer_indices {
            self.layers[i].set_all_parameter(value)?;
        }
        Ok(())
    }

    /// Perturb every trainable parameter by a uniform value in
    /// `[-range, range]`.
    pub fn apply_noise(&mut self, range: f32, rng: &mut RngContext) -> Result<()> {
        for &i in &self.parameter_layer_indices {
            self.layers[i].apply_noise(rng, range)?;
        }
        Ok(())
    }

    /// Evolutionary step: pick one parameter layer uniformly and perturb a
    /// single one of its scalars. Fails when no parameter layers exist.
    pub fn mutate(&mut self, range: f32, rng: &mut RngContext) -> Result<()> {
        if self.parameter_layer_indices.is_empty() {
            return Err(Error::Uninitialized(
                "cannot mutate: no parameter layers have been added",
            ));
        }
        let pick = self.parameter_layer_indices[rng.index(self.parameter_layer_indices.len())];
        self.layers[pick].mutate(rng, range)
    }

    /// Run the whole set forward, scoring accuracy with an externally
    /// supplied same-result interpreter and accumulating squared-error cost.
    pub fn test<D, F>(&mut self, set: &D, same_result: F) -> Result<TestResult>
    where
        D: Dataset,
        F: Fn(&Tensor, &TensorView<'_>) -> Result<bool>,
    {
        if set.is_empty() {
            return Err(Error::Uninitialized("test set is empty"));
        }
        let start = Instant::now();
        let mut correct = 0usize;
        let mut cost_sum = 0.0f32;
        for i in 0..set.item_count() {
            let data = set.data_at(i)?;
            let label = set.label_at(i)?;
            self.forward_propagation(&data)?;
            if same_result(self.output()?, &label)? {
                correct += 1;
            }
            cost_sum += self.cost(&label)?;
        }
        let count = set.item_count();
        Ok(TestResult {
            data_count: count,
            accuracy: correct as f32 / count as f32,
            avg_cost: cost_sum / count as f32,
            elapsed: start.elapsed(),
        })
    }

    /// Move every layer's forward-path tensors into device memory.
    /// Forward propagation and `test` then run on the accelerator;
    /// backpropagation and mutation stay host passes.
    pub fn enable_device(&mut self, ctx: &CudaContext) -> Result<()> {
        for layer in &mut self.layers {
            layer.enable_device(ctx)?;
        }
        Ok(())
    }

    /// Move every layer back into host memory.
    pub fn disable_device(&mut self) -> Result<()> {
        for layer in &mut self.layers {
            layer.disable_device()?;
        }
        Ok(())
    }
}
