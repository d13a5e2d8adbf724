//! # stoat-data
//!
//! Training-set containers for the Stoat engine.
//!
//! - [`Dataset`] — the contract the network trains and tests against:
//!   indexed, shuffle-reorderable access to (data, label) example pairs as
//!   observing tensor views
//! - [`DataSpace`] — the packed implementation: one backing tensor holding
//!   every example row, a shuffle table of row indices, zero-copy views

pub mod dataset;
pub mod space;

pub use dataset::Dataset;
pub use space::DataSpace;
