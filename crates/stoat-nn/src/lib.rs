//! # stoat-nn
//!
//! The layer graph and training orchestration for Stoat.
//!
//! - [`Layer`] — one unit of the chain: shared activation/error state plus a
//!   [`LayerKind`] variant (fully-connected, convolutional, pooling)
//! - [`Network`] — the orchestrator: owns the ordered layer chain, drives
//!   forward propagation, error backpropagation, batched delta application,
//!   and the evolutionary mutation entry point
//! - [`TrainConfig`] — batch size, epoch count, learning rate
//! - [`TestResult`] / [`same_classification`] — accuracy and cost reporting

pub mod convolutional;
pub mod fully_connected;
pub mod layer;
pub mod metrics;
pub mod network;
pub mod pooling;

pub use convolutional::Convolutional;
pub use fully_connected::FullyConnected;
pub use layer::{Layer, LayerKind};
pub use metrics::{same_classification, TestResult};
pub use network::{Network, TrainConfig};
pub use pooling::Pooling;
