//! LeNet-5 digit classifier trained on augmented MNIST.
//!
//! The pipeline is linear: [`dataset::load`] the split, stream augmented
//! batches from [`augment::ImageAugmenter::flow`], train a
//! [`network::LeNet`] with [`training::run`], then [`report`] the curves
//! and the final test metrics.

pub mod augment;
pub mod dataset;
pub mod error;
pub mod history;
pub mod network;
pub mod report;
pub mod training;

pub use error::{Error, Result};
