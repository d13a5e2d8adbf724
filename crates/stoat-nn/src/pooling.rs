use stoat_core::{output_side, Error, Format, PoolKind, Result, Tensor, TensorView};

// Pooling layer
//
// Downsamples each depth slice independently by reducing filter×filter
// windows with max, min, or average. No trainable parameters: the layer is
// never registered as a parameter layer and delta application is a no-op.
//
// Backward routing: max/min send the window's error to the element that won
// the forward reduction (recomputed from the forward input, first match on
// ties); average splits it evenly across the window.

pub struct Pooling {
    filter_size: usize,
    stride: usize,
    kind: PoolKind,
}

impl Pooling {
    pub fn new(filter_size: usize, stride: usize, kind: PoolKind) -> Result<Self> {
        if filter_size == 0 {
            return Err(Error::InvalidHyperparameter(
                "filter size must be greater than 0".into(),
            ));
        }
        if stride == 0 {
            return Err(Error::InvalidHyperparameter(
                "stride must be greater than 0".into(),
            ));
        }
        if stride > filter_size {
            return Err(Error::InvalidHyperparameter(format!(
                "stride {stride} must not exceed the filter size {filter_size}"
            )));
        }
        Ok(Pooling {
            filter_size,
            stride,
            kind,
        })
    }

    pub fn filter_size(&self) -> usize {
        self.filter_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Compute the output format; depth passes through unchanged.
    pub(crate) fn bind_input(&self, input_format: Format) -> Result<Format> {
        let out_w = output_side(input_format.width(), self.filter_size, self.stride)?;
        let out_h = output_side(input_format.height(), self.filter_size, self.stride)?;
        Ok(Format::new(out_w, out_h, input_format.depth()))
    }

    pub(crate) fn forward(&self, activations: &mut Tensor, input: &TensorView<'_>) -> Result<()> {
        activations.fill_pool(input, self.filter_size, self.stride, self.kind)
    }

    /// Route the upstream error back to the window elements that produced
    /// each output. Error slots are read and zeroed even when there is no
    /// predecessor to receive them.
    pub(crate) fn backward(
        &self,
        error: &mut Tensor,
        input: &TensorView<'_>,
        mut passing_error: Option<&mut Tensor>,
    ) -> Result<()> {
        let out_format = error.format();
        let in_format = input.format();
        let input_values = input.as_slice()?;
        let err = error.as_mut_slice()?;
        let f = self.filter_size;

        for z in 0..out_format.depth() {
            for y in 0..out_format.height() {
                for x in 0..out_format.width() {
                    let out_idx = out_format.index_of(x, y, z);
                    let error_value = err[out_idx];
                    err[out_idx] = 0.0;
                    let Some(pe) = passing_error.as_deref_mut() else {
                        continue;
                    };

                    let x0 = x * self.stride;
                    let y0 = y * self.stride;
                    match self.kind {
                        PoolKind::Average => {
                            let share = error_value / (f * f) as f32;
                            for dy in 0..f {
                                for dx in 0..f {
                                    let in_idx = in_format.index_of(x0 + dx, y0 + dy, z);
                                    pe.add_at_flat(in_idx, share)?;
                                }
                            }
                        }
                        PoolKind::Max | PoolKind::Min => {
                            let mut best_idx = in_format.index_of(x0, y0, z);
                            let mut best = input_values[best_idx];
                            for dy in 0..f {
                                for dx in 0..f {
                                    let in_idx = in_format.index_of(x0 + dx, y0 + dy, z);
                                    let v = input_values[in_idx];
                                    let wins = match self.kind {
                                        PoolKind::Max => v > best,
                                        _ => v < best,
                                    };
                                    if wins {
                                        best = v;
                                        best_idx = in_idx;
                                    }
                                }
                            }
                            pe.add_at_flat(best_idx, error_value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
