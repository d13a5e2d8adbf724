// Dataset trait — the training-set contract

use stoat_core::{Format, Result, RngContext, TensorView};

/// An indexed collection of labeled examples.
///
/// The network orchestrator only depends on this contract: per position one
/// data view matching the network's input format and one label view matching
/// its output format, plus randomized reordering that never moves the
/// underlying values.
pub trait Dataset {
    /// Total number of examples.
    fn item_count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Format of every data tensor.
    fn data_format(&self) -> Format;

    /// Format of every label tensor.
    fn label_format(&self) -> Format;

    /// Randomly reorder the examples (index indirection only).
    fn shuffle(&mut self, rng: &mut RngContext);

    /// Observing view of the data at (shuffled) position `index`.
    fn data_at(&self, index: usize) -> Result<TensorView<'_>>;

    /// Observing view of the label at (shuffled) position `index`.
    fn label_at(&self, index: usize) -> Result<TensorView<'_>>;
}
