use crate::activation::Activation;
use crate::bail;
use crate::cuda::{self, CudaContext, DeviceBuffer};
use crate::error::{Error, Result};
use crate::format::{output_side, Format};
use crate::host;
use crate::rng::RngContext;

// Tensor — the numeric container every layer is built from
//
// A Tensor owns a flat f32 buffer of fixed Format. The buffer lives either
// in host memory (Vec) or in device memory (DeviceBuffer); the residency of
// a tensor is a runtime flag, and an operation either runs its sequential
// host strategy or its parallel device strategy depending on that flag.
// Operands of one operation must share residency.
//
// Shape validation happens exactly once per operation, in this file, before
// either strategy runs; on error the target tensor is left unmodified.
//
// TensorView is the observing mode: a read-only window into another tensor's
// buffer (whole tensor, or a row of a packed example table). A view borrows
// the owner, so it can never be freed on its own or outlive the storage it
// watches.

/// Where a tensor's buffer currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Host,
    Device,
}

/// Pooling reduction applied to each sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Min,
    Average,
}

enum Storage {
    Host(Vec<f32>),
    Device(DeviceBuffer),
}

/// Fixed-shape `(width, height, depth)` f32 container, host- or
/// device-resident.
pub struct Tensor {
    format: Format,
    data: Storage,
}

enum ViewRepr<'a> {
    Host(&'a [f32]),
    Device { buf: &'a DeviceBuffer, offset: usize },
}

/// Read-only window into a [`Tensor`]'s storage.
///
/// The lifetime ties the view to its owner; the window reinterprets
/// `item_count` contiguous elements under its own [`Format`].
pub struct TensorView<'a> {
    format: Format,
    repr: ViewRepr<'a>,
}

fn check_format(expected: Format, got: Format) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::FormatMismatch { expected, got })
    }
}

impl Tensor {
    /// Allocate a zero-filled host tensor. Empty formats are rejected.
    pub fn zeros(format: impl Into<Format>) -> Result<Self> {
        let format = format.into();
        if format.item_count() == 0 {
            bail!("cannot allocate tensor with empty format {}", format);
        }
        Ok(Tensor {
            format,
            data: Storage::Host(vec![0.0; format.item_count()]),
        })
    }

    /// Create a host tensor from a flat buffer in `(x, y, z)` index order.
    pub fn from_slice(format: impl Into<Format>, data: &[f32]) -> Result<Self> {
        let format = format.into();
        if format.item_count() == 0 {
            bail!("cannot allocate tensor with empty format {}", format);
        }
        if data.len() != format.item_count() {
            bail!(
                "format {} requires {} elements, got {}",
                format,
                format.item_count(),
                data.len()
            );
        }
        Ok(Tensor {
            format,
            data: Storage::Host(data.to_vec()),
        })
    }

    // Accessors

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn item_count(&self) -> usize {
        self.format.item_count()
    }

    pub fn residency(&self) -> Residency {
        match self.data {
            Storage::Host(_) => Residency::Host,
            Storage::Device(_) => Residency::Device,
        }
    }

    pub fn is_device(&self) -> bool {
        self.residency() == Residency::Device
    }

    /// The host buffer, or `HostOnly` if device-resident.
    pub fn as_slice(&self) -> Result<&[f32]> {
        match &self.data {
            Storage::Host(v) => Ok(v),
            Storage::Device(_) => Err(Error::HostOnly { op: "direct access" }),
        }
    }

    /// The mutable host buffer, or `HostOnly` if device-resident.
    pub fn as_mut_slice(&mut self) -> Result<&mut [f32]> {
        match &mut self.data {
            Storage::Host(v) => Ok(v),
            Storage::Device(_) => Err(Error::HostOnly { op: "direct access" }),
        }
    }

    /// Copy the contents to a host vector regardless of residency.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        match &self.data {
            Storage::Host(v) => Ok(v.clone()),
            Storage::Device(buf) => cuda::read_to_host(buf, 0, self.item_count()),
        }
    }

    // Element access (host only)

    pub fn get_flat(&self, index: usize) -> Result<f32> {
        let data = self.as_slice()?;
        data.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            count: data.len(),
        })
    }

    pub fn set_flat(&mut self, index: usize, value: f32) -> Result<()> {
        let data = self.as_mut_slice()?;
        let count = data.len();
        let slot = data
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, count })?;
        *slot = value;
        Ok(())
    }

    pub fn add_at_flat(&mut self, index: usize, value: f32) -> Result<()> {
        let data = self.as_mut_slice()?;
        let count = data.len();
        let slot = data
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, count })?;
        *slot += value;
        Ok(())
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Result<f32> {
        self.get_flat(self.format.index_of(x, y, z))
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) -> Result<()> {
        self.set_flat(self.format.index_of(x, y, z), value)
    }

    // Views

    /// Observe the whole tensor.
    pub fn view(&self) -> TensorView<'_> {
        let repr = match &self.data {
            Storage::Host(v) => ViewRepr::Host(v),
            Storage::Device(buf) => ViewRepr::Device { buf, offset: 0 },
        };
        TensorView {
            format: self.format,
            repr,
        }
    }

    /// Observe a window of `format.item_count()` elements starting at `offset`.
    ///
    /// Used for zero-copy access to rows of a packed example table; the
    /// window carries its own format.
    pub fn view_as(&self, format: impl Into<Format>, offset: usize) -> Result<TensorView<'_>> {
        let format = format.into();
        let end = offset + format.item_count();
        if end > self.item_count() {
            return Err(Error::IndexOutOfRange {
                index: end,
                count: self.item_count(),
            });
        }
        let repr = match &self.data {
            Storage::Host(v) => ViewRepr::Host(&v[offset..end]),
            Storage::Device(buf) => ViewRepr::Device { buf, offset },
        };
        Ok(TensorView { format, repr })
    }

    // Residency switches (synchronous copy, then the source side is freed)

    /// Move the buffer into device memory. No-op if already device-resident.
    pub fn to_device(&mut self, ctx: &CudaContext) -> Result<()> {
        if let Storage::Host(v) = &self.data {
            let buf = cuda::alloc_from_host(ctx, v)?;
            self.data = Storage::Device(buf);
        }
        Ok(())
    }

    /// Move the buffer back into host memory. No-op if already host-resident.
    pub fn to_host(&mut self) -> Result<()> {
        if let Storage::Device(buf) = &self.data {
            let v = cuda::read_to_host(buf, 0, self.item_count())?;
            self.data = Storage::Host(v);
        }
        Ok(())
    }

    // Elementwise operations

    /// Set every element to `value`.
    pub fn set_all(&mut self, value: f32) -> Result<()> {
        match &mut self.data {
            Storage::Host(v) => {
                v.fill(value);
                Ok(())
            }
            Storage::Device(buf) => cuda::fill(buf, value),
        }
    }

    /// Elementwise `self += rhs`. Formats must match exactly.
    pub fn add_assign(&mut self, rhs: &Tensor) -> Result<()> {
        check_format(self.format, rhs.format)?;
        match (&mut self.data, &rhs.data) {
            (Storage::Host(dst), Storage::Host(src)) => {
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d += s;
                }
                Ok(())
            }
            (Storage::Device(dst), Storage::Device(src)) => cuda::add_assign(dst, src),
            _ => Err(Error::ResidencyMismatch { op: "add" }),
        }
    }

    /// Per-depth broadcast add: `biases` is `(1, 1, depth)` and value `z` is
    /// added to every element of depth slice `z`.
    pub fn add_per_depth(&mut self, biases: &Tensor) -> Result<()> {
        check_format(Format::new(1, 1, self.format.depth()), biases.format)?;
        let slice_len = self.format.slice_count();
        match (&mut self.data, &biases.data) {
            (Storage::Host(dst), Storage::Host(b)) => {
                for (idx, v) in dst.iter_mut().enumerate() {
                    *v += b[idx / slice_len];
                }
                Ok(())
            }
            (Storage::Device(dst), Storage::Device(b)) => cuda::add_per_depth(dst, b, slice_len),
            _ => Err(Error::ResidencyMismatch { op: "depth add" }),
        }
    }

    /// Apply an activation function elementwise in place.
    pub fn apply_activation(&mut self, act: Activation) -> Result<()> {
        match &mut self.data {
            Storage::Host(v) => {
                host::apply_activation(v, act);
                Ok(())
            }
            Storage::Device(buf) => cuda::apply_activation(buf, act),
        }
    }

    // Kernel primitives

    /// `self[i] = Σ_j weights[j, i] · input[j]`
    ///
    /// Requires `weights.item_count == input.item_count · self.item_count`
    /// (weights laid out `(input_count, out_count, 1)`).
    pub fn fill_dot_product(&mut self, weights: &Tensor, input: &TensorView<'_>) -> Result<()> {
        let in_count = input.item_count();
        let out_count = self.item_count();
        if weights.item_count() != in_count * out_count {
            bail!(
                "dot product mismatch: weights {} must hold {}x{} elements",
                weights.format,
                in_count,
                out_count
            );
        }
        match (&mut self.data, &weights.data, &input.repr) {
            (Storage::Host(out), Storage::Host(w), ViewRepr::Host(inp)) => {
                host::dot_product(w, inp, out);
                Ok(())
            }
            (Storage::Device(out), Storage::Device(w), ViewRepr::Device { buf, offset }) => {
                cuda::dot_product(out, w, buf, *offset, in_count)
            }
            _ => Err(Error::ResidencyMismatch { op: "dot product" }),
        }
    }

    /// Valid cross-correlation of `input` against a set of kernels, one
    /// output depth slice per kernel.
    ///
    /// Every kernel must be `(k, k, input_depth)`; the output side
    /// `(n − k)/stride + 1` must come out whole on both axes, and `self`
    /// must already have the resulting `(out_w, out_h, kernel_count)` format.
    pub fn fill_cross_correlation(
        &mut self,
        input: &TensorView<'_>,
        kernels: &[Tensor],
        stride: usize,
    ) -> Result<()> {
        let first = kernels
            .first()
            .ok_or(Error::Uninitialized("cross-correlation without kernels"))?;
        let k = first.format.width();
        if first.format.height() != k {
            bail!("kernel {} is not square", first.format);
        }
        for kern in kernels {
            check_format(first.format, kern.format)?;
        }
        let in_format = input.format();
        if first.format.depth() != in_format.depth() {
            bail!(
                "kernel depth {} does not match input depth {}",
                first.format.depth(),
                in_format.depth()
            );
        }
        let out_w = output_side(in_format.width(), k, stride)?;
        let out_h = output_side(in_format.height(), k, stride)?;
        check_format(Format::new(out_w, out_h, kernels.len()), self.format)?;

        let slice_len = out_w * out_h;
        match (&mut self.data, &input.repr) {
            (Storage::Host(out), ViewRepr::Host(inp)) => {
                for (d, kern) in kernels.iter().enumerate() {
                    let Storage::Host(kbuf) = &kern.data else {
                        return Err(Error::ResidencyMismatch {
                            op: "cross-correlation",
                        });
                    };
                    host::cross_correlation(
                        inp,
                        in_format,
                        kbuf,
                        k,
                        stride,
                        &mut out[d * slice_len..(d + 1) * slice_len],
                        out_w,
                        out_h,
                    );
                }
                Ok(())
            }
            (Storage::Device(out), ViewRepr::Device { buf, offset }) => {
                for (d, kern) in kernels.iter().enumerate() {
                    let Storage::Device(kbuf) = &kern.data else {
                        return Err(Error::ResidencyMismatch {
                            op: "cross-correlation",
                        });
                    };
                    cuda::cross_correlation(
                        out,
                        d * slice_len,
                        buf,
                        *offset,
                        kbuf,
                        in_format.width(),
                        in_format.height(),
                        k,
                        stride,
                        in_format.depth(),
                        slice_len,
                    )?;
                }
                Ok(())
            }
            _ => Err(Error::ResidencyMismatch {
                op: "cross-correlation",
            }),
        }
    }

    /// Pool every depth slice of `input` into `self` with the selected
    /// reduction. Depth is preserved; windows never overlap the edge.
    pub fn fill_pool(
        &mut self,
        input: &TensorView<'_>,
        filter: usize,
        stride: usize,
        kind: PoolKind,
    ) -> Result<()> {
        let in_format = input.format();
        let out_w = output_side(in_format.width(), filter, stride)?;
        let out_h = output_side(in_format.height(), filter, stride)?;
        check_format(Format::new(out_w, out_h, in_format.depth()), self.format)?;
        match (&mut self.data, &input.repr) {
            (Storage::Host(out), ViewRepr::Host(inp)) => {
                host::pool(inp, in_format, filter, stride, kind, out, out_w, out_h);
                Ok(())
            }
            (Storage::Device(out), ViewRepr::Device { buf, offset }) => cuda::pool(
                out,
                buf,
                *offset,
                in_format.width(),
                in_format.height(),
                filter,
                stride,
                out_w,
                out_h,
                kind,
            ),
            _ => Err(Error::ResidencyMismatch { op: "pool" }),
        }
    }

    // Random perturbation (host only)

    /// Add a uniform value in `[-range, range]` to every element.
    pub fn apply_noise(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        match &mut self.data {
            Storage::Host(v) => {
                for slot in v.iter_mut() {
                    *slot += rng.uniform(-range, range);
                }
                Ok(())
            }
            Storage::Device(_) => Err(Error::HostOnly { op: "apply_noise" }),
        }
    }

    /// Perturb exactly one uniformly chosen element by a uniform value in
    /// `[-range, range]`.
    pub fn mutate(&mut self, rng: &mut RngContext, range: f32) -> Result<()> {
        match &mut self.data {
            Storage::Host(v) => {
                let idx = rng.index(v.len());
                v[idx] += rng.uniform(-range, range);
                Ok(())
            }
            Storage::Device(_) => Err(Error::HostOnly { op: "mutate" }),
        }
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(format={}, residency={:?})",
            self.format,
            self.residency()
        )
    }
}

impl<'a> TensorView<'a> {
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn item_count(&self) -> usize {
        self.format.item_count()
    }

    pub fn residency(&self) -> Residency {
        match self.repr {
            ViewRepr::Host(_) => Residency::Host,
            ViewRepr::Device { .. } => Residency::Device,
        }
    }

    /// The observed host window, or `HostOnly` if the owner is on device.
    pub fn as_slice(&self) -> Result<&'a [f32]> {
        match self.repr {
            ViewRepr::Host(s) => Ok(s),
            ViewRepr::Device { .. } => Err(Error::HostOnly { op: "direct access" }),
        }
    }

    pub fn get_flat(&self, index: usize) -> Result<f32> {
        let data = self.as_slice()?;
        data.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            count: data.len(),
        })
    }

    /// Copy the observed window to a host vector regardless of residency.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        match &self.repr {
            ViewRepr::Host(s) => Ok(s.to_vec()),
            ViewRepr::Device { buf, offset } => {
                cuda::read_to_host(buf, *offset, self.item_count())
            }
        }
    }
}
