use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("MNIST data unavailable: {} not found", .0.display())]
    DataUnavailable(PathBuf),

    #[error("Shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Label {label} at index {index} is out of range for {num_classes} classes")]
    LabelOutOfRange {
        index: usize,
        label: u8,
        num_classes: usize,
    },

    #[error("Invalid augmentation setting {name} = {value}")]
    InvalidAugmentation { name: &'static str, value: f64 },

    #[error("Featurewise standardization requested before the augmenter was fitted")]
    NotFitted,

    #[error("Cannot draw batches of {batch_size} from {len} examples")]
    EmptyFlow { len: usize, batch_size: usize },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Progress(#[from] indicatif::style::TemplateError),
}

pub type Result<T> = std::result::Result<T, Error>;
