// CUDA strategy — device residency and the parallel kernel launches
//
// A CudaContext wraps a cudarc device handle with the Stoat kernel module
// compiled at creation time via NVRTC. Device-resident tensors hold a
// DeviceBuffer tied to the context that allocated it.
//
// Every dispatch here is blocking from the host's perspective: launch, then
// synchronize, then check. A failed launch or sync is fatal for the
// surrounding operation and surfaces as `Error::Device`. Shape validation
// happens in `tensor.rs` before any of these routines run.

pub mod kernels;

use std::fmt;
use std::sync::Arc;

use cudarc::driver::{CudaFunction, CudaSlice, DeviceSlice, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::{compile_ptx_with_opts, CompileOptions};

use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::tensor::PoolKind;

/// Handle to one CUDA device with the Stoat kernels loaded.
///
/// Cloning is cheap (shared `Arc` internally); all device tensors created
/// through a context keep a clone of it.
#[derive(Clone)]
pub struct CudaContext {
    dev: Arc<cudarc::driver::CudaDevice>,
    ordinal: usize,
}

impl CudaContext {
    /// Create a context for GPU `ordinal`, compiling and loading all kernels.
    pub fn new(ordinal: usize) -> Result<Self> {
        let dev = cudarc::driver::CudaDevice::new(ordinal)
            .map_err(|e| Error::Device(format!("device {ordinal} selection failed: {e}")))?;

        // Target the device's own SM so the generated code never outruns the
        // driver's PTX version. CompileOptions wants a 'static str.
        use cudarc::driver::sys::CUdevice_attribute_enum as Attr;
        let major = dev
            .attribute(Attr::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .unwrap_or(8);
        let minor = dev
            .attribute(Attr::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .unwrap_or(9);
        let arch: &'static str = Box::leak(format!("sm_{major}{minor}").into_boxed_str());

        let opts = CompileOptions {
            arch: Some(arch),
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(kernels::KERNEL_SOURCE, opts)
            .map_err(|e| Error::Device(format!("kernel compilation failed: {e}")))?;
        dev.load_ptx(ptx, kernels::MODULE_NAME, kernels::KERNEL_NAMES)
            .map_err(|e| Error::Device(format!("kernel load failed: {e}")))?;

        Ok(CudaContext { dev, ordinal })
    }

    fn func(&self, name: &str) -> Result<CudaFunction> {
        self.dev
            .get_func(kernels::MODULE_NAME, name)
            .ok_or_else(|| Error::Device(format!("kernel '{name}' not loaded")))
    }

    /// Block until all launched work has finished, surfacing driver errors.
    fn sync(&self) -> Result<()> {
        self.dev
            .synchronize()
            .map_err(|e| Error::Device(format!("synchronize failed: {e}")))
    }
}

impl fmt::Debug for CudaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CudaContext(cuda:{})", self.ordinal)
    }
}

/// One block per 256 output elements; each thread owns one element.
fn launch_cfg(n: usize) -> LaunchConfig {
    const BLOCK: u32 = 256;
    let grid = (n as u32).div_ceil(BLOCK);
    LaunchConfig {
        block_dim: (BLOCK, 1, 1),
        grid_dim: (grid.max(1), 1, 1),
        shared_mem_bytes: 0,
    }
}

/// Device-side storage of one tensor, bound to the context that allocated it.
pub struct DeviceBuffer {
    pub(crate) data: CudaSlice<f32>,
    pub(crate) ctx: CudaContext,
}

impl DeviceBuffer {
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }
}

/// Copy a host buffer into fresh device memory.
pub(crate) fn alloc_from_host(ctx: &CudaContext, data: &[f32]) -> Result<DeviceBuffer> {
    let slice = ctx
        .dev
        .htod_sync_copy(data)
        .map_err(|e| Error::Device(format!("host-to-device copy failed: {e}")))?;
    Ok(DeviceBuffer {
        data: slice,
        ctx: ctx.clone(),
    })
}

/// Copy `len` elements starting at `offset` back to the host.
pub(crate) fn read_to_host(buf: &DeviceBuffer, offset: usize, len: usize) -> Result<Vec<f32>> {
    let host = buf
        .ctx
        .dev
        .dtoh_sync_copy(&buf.data)
        .map_err(|e| Error::Device(format!("device-to-host copy failed: {e}")))?;
    Ok(host[offset..offset + len].to_vec())
}

pub(crate) fn fill(buf: &mut DeviceBuffer, value: f32) -> Result<()> {
    let n = buf.len();
    let ctx = buf.ctx.clone();
    let func = ctx.func("fill_f32")?;
    unsafe { func.launch(launch_cfg(n), (&mut buf.data, value, n as u32)) }
        .map_err(|e| Error::Device(format!("fill launch failed: {e}")))?;
    ctx.sync()
}

pub(crate) fn add_assign(dst: &mut DeviceBuffer, src: &DeviceBuffer) -> Result<()> {
    let n = dst.len();
    let ctx = dst.ctx.clone();
    let func = ctx.func("add_assign_f32")?;
    unsafe { func.launch(launch_cfg(n), (&mut dst.data, &src.data, n as u32)) }
        .map_err(|e| Error::Device(format!("add launch failed: {e}")))?;
    ctx.sync()
}

pub(crate) fn add_per_depth(
    dst: &mut DeviceBuffer,
    biases: &DeviceBuffer,
    slice_len: usize,
) -> Result<()> {
    let n = dst.len();
    let ctx = dst.ctx.clone();
    let func = ctx.func("add_depth_f32")?;
    unsafe {
        func.launch(
            launch_cfg(n),
            (&mut dst.data, &biases.data, slice_len as u32, n as u32),
        )
    }
    .map_err(|e| Error::Device(format!("depth add launch failed: {e}")))?;
    ctx.sync()
}

pub(crate) fn dot_product(
    out: &mut DeviceBuffer,
    weights: &DeviceBuffer,
    input: &DeviceBuffer,
    input_offset: usize,
    input_count: usize,
) -> Result<()> {
    let out_count = out.len();
    let ctx = out.ctx.clone();
    let func = ctx.func("dot_product_f32")?;
    unsafe {
        func.launch(
            launch_cfg(out_count),
            (
                &weights.data,
                &input.data,
                input_offset as u32,
                &mut out.data,
                input_count as u32,
                out_count as u32,
            ),
        )
    }
    .map_err(|e| Error::Device(format!("dot product launch failed: {e}")))?;
    ctx.sync()
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cross_correlation(
    out: &mut DeviceBuffer,
    out_offset: usize,
    input: &DeviceBuffer,
    input_offset: usize,
    kernel: &DeviceBuffer,
    in_w: usize,
    in_h: usize,
    kernel_size: usize,
    stride: usize,
    depth: usize,
    slice_len: usize,
) -> Result<()> {
    let ctx = out.ctx.clone();
    let func = ctx.func("cross_correlation_f32")?;
    let out_w = ((in_w - kernel_size) / stride) + 1;
    unsafe {
        func.launch(
            launch_cfg(slice_len),
            (
                &input.data,
                input_offset as u32,
                &kernel.data,
                &mut out.data,
                out_offset as u32,
                in_w as u32,
                in_h as u32,
                kernel_size as u32,
                stride as u32,
                depth as u32,
                out_w as u32,
                slice_len as u32,
            ),
        )
    }
    .map_err(|e| Error::Device(format!("cross-correlation launch failed: {e}")))?;
    ctx.sync()
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn pool(
    out: &mut DeviceBuffer,
    input: &DeviceBuffer,
    input_offset: usize,
    in_w: usize,
    in_h: usize,
    filter: usize,
    stride: usize,
    out_w: usize,
    out_h: usize,
    kind: PoolKind,
) -> Result<()> {
    let n = out.len();
    let ctx = out.ctx.clone();
    let func = ctx.func("pool_f32")?;
    let mode: i32 = match kind {
        PoolKind::Max => 0,
        PoolKind::Min => 1,
        PoolKind::Average => 2,
    };
    unsafe {
        func.launch(
            launch_cfg(n),
            (
                &input.data,
                input_offset as u32,
                &mut out.data,
                in_w as u32,
                in_h as u32,
                filter as u32,
                stride as u32,
                out_w as u32,
                out_h as u32,
                mode,
                n as u32,
            ),
        )
    }
    .map_err(|e| Error::Device(format!("pool launch failed: {e}")))?;
    ctx.sync()
}

pub(crate) fn apply_activation(buf: &mut DeviceBuffer, act: Activation) -> Result<()> {
    let n = buf.len();
    let ctx = buf.ctx.clone();
    let name = match act {
        Activation::Sigmoid => "sigmoid_f32",
        Activation::Relu => "relu_f32",
    };
    let func = ctx.func(name)?;
    unsafe { func.launch(launch_cfg(n), (&mut buf.data, n as u32)) }
        .map_err(|e| Error::Device(format!("{name} launch failed: {e}")))?;
    ctx.sync()
}
