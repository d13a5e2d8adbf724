//! # Stoat
//!
//! A small from-scratch neural-network training engine: a `(width, height,
//! depth)` tensor with optional accelerator residency, a linear chain of
//! layers (fully-connected, convolutional, pooling), forward propagation and
//! batched error backpropagation, plus a random-perturbation mutation mode
//! as an evolutionary alternative to gradient descent.
//!
//! This umbrella crate re-exports the workspace:
//! - `stoat-core` — tensor, formats, kernel primitives, CUDA context, errors
//! - `stoat-data` — training-set containers
//! - `stoat-nn` — layers, the network orchestrator, metrics
//!
//! ```ignore
//! use stoat::prelude::*;
//!
//! let mut net = Network::new();
//! net.set_input_format((8, 8, 1))?;
//! net.set_output_format(Format::column(10))?;
//! net.add_convolutional(4, 3, 1, Activation::Relu)?;
//! net.add_pooling(2, 2, PoolKind::Max)?;
//! net.add_fully_connected(16, Activation::Sigmoid)?;
//! net.add_output_fully_connected(Activation::Sigmoid)?;
//!
//! let mut rng = RngContext::from_seed(1);
//! net.apply_noise(0.5, &mut rng)?;
//! net.learn(&mut set, &TrainConfig::default(), &mut rng)?;
//! let result = net.test(&set, same_classification)?;
//! println!("{result}");
//! ```

pub use stoat_core as core;
pub use stoat_data as data;
pub use stoat_nn as nn;

pub use stoat_core::{Error, Result};

/// The most common imports in one place.
pub mod prelude {
    pub use stoat_core::{
        Activation, CudaContext, Error, Format, PoolKind, Residency, Result, RngContext, Tensor,
        TensorView,
    };
    pub use stoat_data::{DataSpace, Dataset};
    pub use stoat_nn::{
        same_classification, Layer, LayerKind, Network, TestResult, TrainConfig,
    };
}
