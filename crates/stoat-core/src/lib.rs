//! # stoat-core
//!
//! Core primitives for the Stoat training engine.
//!
//! This crate provides:
//! - [`Tensor`] — fixed-shape `(width, height, depth)` f32 container, host- or
//!   device-resident, with the numeric kernels every layer is built from
//! - [`TensorView`] — read-only borrowed window into another tensor's storage
//! - [`Format`] — the 3-axis shape and its flat index law
//! - [`Activation`] / [`PoolKind`] — the kernel-level function identifiers
//! - [`CudaContext`] — compiled-kernel handle for device residency
//! - [`RngContext`] — explicit, seedable randomness for shuffle/noise/mutation
//! - [`Error`] / [`Result`] — the crate-wide error type

pub mod activation;
pub mod cuda;
pub mod error;
pub mod format;
mod host;
pub mod rng;
pub mod tensor;

pub use activation::Activation;
pub use cuda::CudaContext;
pub use error::{Error, Result};
pub use format::{output_side, Format};
pub use rng::RngContext;
pub use tensor::{PoolKind, Residency, Tensor, TensorView};
