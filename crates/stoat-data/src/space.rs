use stoat_core::{bail, CudaContext, Error, Format, Result, RngContext, Tensor, TensorView};

use crate::dataset::Dataset;

// DataSpace — packed example storage
//
// All examples live in one backing tensor of format
// (data_items + label_items, item_count, 1): one row per example, the data
// elements first, the label elements after them. Example access hands out
// observing views into the row, so iterating the set never copies.
//
// Shuffling permutes a table of row indices; the rows themselves never move,
// which keeps views stable and makes reshuffling an O(n) index operation.

/// Packed training-set storage with shuffle-table indirection.
pub struct DataSpace {
    table: Tensor,
    shuffle_table: Vec<usize>,
    data_format: Format,
    label_format: Format,
}

impl DataSpace {
    /// Pack per-example data and label tensors into one table.
    ///
    /// Every data tensor must match `data_format`, every label tensor
    /// `label_format`; the two lists must be host-resident and equally long.
    pub fn new(
        data_format: impl Into<Format>,
        label_format: impl Into<Format>,
        data: &[Tensor],
        labels: &[Tensor],
    ) -> Result<Self> {
        let data_format = data_format.into();
        let label_format = label_format.into();
        if data.is_empty() {
            bail!("data space needs at least one example");
        }
        if data.len() != labels.len() {
            bail!(
                "data and label counts differ: {} vs {}",
                data.len(),
                labels.len()
            );
        }

        let row_len = data_format.item_count() + label_format.item_count();
        let mut table = Tensor::zeros((row_len, data.len(), 1))?;
        {
            let rows = table.as_mut_slice()?;
            for (i, (d, l)) in data.iter().zip(labels.iter()).enumerate() {
                if d.format() != data_format {
                    return Err(Error::FormatMismatch {
                        expected: data_format,
                        got: d.format(),
                    });
                }
                if l.format() != label_format {
                    return Err(Error::FormatMismatch {
                        expected: label_format,
                        got: l.format(),
                    });
                }
                let row = &mut rows[i * row_len..(i + 1) * row_len];
                row[..data_format.item_count()].copy_from_slice(d.as_slice()?);
                row[data_format.item_count()..].copy_from_slice(l.as_slice()?);
            }
        }

        Ok(DataSpace {
            shuffle_table: (0..data.len()).collect(),
            table,
            data_format,
            label_format,
        })
    }

    fn row_len(&self) -> usize {
        self.data_format.item_count() + self.label_format.item_count()
    }

    fn row_at(&self, index: usize) -> Result<usize> {
        self.shuffle_table
            .get(index)
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index,
                count: self.shuffle_table.len(),
            })
    }

    /// Move the whole table into device memory; views handed out afterwards
    /// observe device storage.
    pub fn to_device(&mut self, ctx: &CudaContext) -> Result<()> {
        self.table.to_device(ctx)
    }

    /// Move the table back into host memory.
    pub fn to_host(&mut self) -> Result<()> {
        self.table.to_host()
    }
}

impl Dataset for DataSpace {
    fn item_count(&self) -> usize {
        self.shuffle_table.len()
    }

    fn data_format(&self) -> Format {
        self.data_format
    }

    fn label_format(&self) -> Format {
        self.label_format
    }

    fn shuffle(&mut self, rng: &mut RngContext) {
        rng.shuffle(&mut self.shuffle_table);
    }

    fn data_at(&self, index: usize) -> Result<TensorView<'_>> {
        let row = self.row_at(index)?;
        self.table.view_as(self.data_format, row * self.row_len())
    }

    fn label_at(&self, index: usize) -> Result<TensorView<'_>> {
        let row = self.row_at(index)?;
        self.table.view_as(
            self.label_format,
            row * self.row_len() + self.data_format.item_count(),
        )
    }
}
