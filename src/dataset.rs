use std::ops::Range;
use std::path::Path;

use log::info;
use mnist::{Mnist, MnistBuilder};
use ndarray::{s, Array1, Array4, Axis};

use crate::error::{Error, Result};

pub const IMAGE_HEIGHT: usize = 28;
pub const IMAGE_WIDTH: usize = 28;
pub const IMAGE_CHANNELS: usize = 1;
pub const NUM_CLASSES: usize = 10;

pub const TRAIN_LEN: usize = 60_000;
pub const TEST_LEN: usize = 10_000;

const IMAGE_LEN: usize = IMAGE_HEIGHT * IMAGE_WIDTH * IMAGE_CHANNELS;

const MNIST_FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

/// A group of images with their labels, aligned by index.
#[derive(Clone, Debug)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Array1<u8>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

/// One side of the MNIST split: images as `[N, 28, 28, 1]` in `[0, 1]` and
/// digit labels.
#[derive(Clone, Debug)]
pub struct Split {
    images: Array4<f32>,
    labels: Array1<u8>,
}

impl Split {
    pub fn new(images: Array4<f32>, labels: Array1<u8>) -> Result<Split> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(Error::ShapeMismatch {
                context: "split labels",
                expected: vec![images.len_of(Axis(0))],
                found: vec![labels.len()],
            });
        }

        Ok(Split { images, labels })
    }

    /// Builds a split from raw IDX bytes, scaling every pixel by `1 / 255`.
    pub fn from_raw(pixels: &[u8], labels: &[u8]) -> Result<Split> {
        if pixels.len() != labels.len() * IMAGE_LEN {
            return Err(Error::ShapeMismatch {
                context: "raw pixels",
                expected: vec![labels.len() * IMAGE_LEN],
                found: vec![pixels.len()],
            });
        }

        let pixels: Vec<f32> = pixels.iter().map(|x| <f32>::from(*x) / 255.0).collect();
        let images = Array4::from_shape_vec(
            (labels.len(), IMAGE_HEIGHT, IMAGE_WIDTH, IMAGE_CHANNELS),
            pixels,
        )?;

        Split::new(images, Array1::from(labels.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &Array4<f32> {
        &self.images
    }

    pub fn labels(&self) -> &Array1<u8> {
        &self.labels
    }

    pub fn subset(&self, range: Range<usize>) -> Split {
        Split {
            images: self.images.slice(s![range.clone(), .., .., ..]).to_owned(),
            labels: self.labels.slice(s![range]).to_owned(),
        }
    }

    /// Gathers the examples at `indices` into a batch.
    pub fn select(&self, indices: &[usize]) -> Batch {
        Batch {
            images: self.images.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }

    /// Sequential, un-augmented batches over the whole split. The last batch
    /// may be short.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Batch> + '_ {
        let batch_size = batch_size.max(1);
        (0..self.len()).step_by(batch_size).map(move |start| {
            let end = (start + batch_size).min(self.len());
            Batch {
                images: self.images.slice(s![start..end, .., .., ..]).to_owned(),
                labels: self.labels.slice(s![start..end]).to_owned(),
            }
        })
    }

    /// Checks the `[N, 28, 28, 1]` layout the network expects and that every
    /// label names one of the classes.
    pub fn check_layout(&self, context: &'static str) -> Result<()> {
        let (count, height, width, channels) = self.images.dim();
        if (height, width, channels) != (IMAGE_HEIGHT, IMAGE_WIDTH, IMAGE_CHANNELS) {
            return Err(Error::ShapeMismatch {
                context,
                expected: vec![count, IMAGE_HEIGHT, IMAGE_WIDTH, IMAGE_CHANNELS],
                found: vec![count, height, width, channels],
            });
        }
        if count != self.labels.len() {
            return Err(Error::ShapeMismatch {
                context,
                expected: vec![count],
                found: vec![self.labels.len()],
            });
        }
        if let Some((index, label)) = self
            .labels
            .iter()
            .enumerate()
            .find(|(_, label)| **label as usize >= NUM_CLASSES)
        {
            return Err(Error::LabelOutOfRange {
                index,
                label: *label,
                num_classes: NUM_CLASSES,
            });
        }

        Ok(())
    }
}

/// Loads the full MNIST train/test split from `base_path`.
///
/// With `download` set, missing files are fetched by the `mnist` crate, which
/// aborts on network failure. Without it, every IDX file must already be on
/// disk.
pub fn load(base_path: &str, download: bool) -> Result<(Split, Split)> {
    if !download {
        for name in MNIST_FILES.iter() {
            let path = Path::new(base_path).join(name);
            if !path.is_file() {
                return Err(Error::DataUnavailable(path));
            }
        }
    }

    let mut builder = MnistBuilder::new();
    builder
        .label_format_digit()
        .base_path(base_path)
        .training_set_length(TRAIN_LEN as u32)
        .validation_set_length(0)
        .test_set_length(TEST_LEN as u32);
    if download {
        builder.download_and_extract();
    }

    let Mnist {
        trn_img,
        trn_lbl,
        tst_img,
        tst_lbl,
        ..
    } = builder.finalize();

    let train = Split::from_raw(&trn_img, &trn_lbl)?;
    let test = Split::from_raw(&tst_img, &tst_lbl)?;
    expect_len("training split", &train, TRAIN_LEN)?;
    expect_len("test split", &test, TEST_LEN)?;

    info!(
        "Loaded MNIST from {}: {} training / {} test images",
        base_path,
        train.len(),
        test.len()
    );

    Ok((train, test))
}

fn expect_len(context: &'static str, split: &Split, len: usize) -> Result<()> {
    if split.len() != len {
        return Err(Error::ShapeMismatch {
            context,
            expected: vec![len],
            found: vec![split.len()],
        });
    }
    Ok(())
}

/// Deterministic random images with balanced labels, for tests.
#[cfg(test)]
pub(crate) fn synthetic(count: usize, seed: u64) -> Split {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    let pixels: Vec<u8> = (0..count * IMAGE_LEN).map(|_| rng.gen()).collect();
    let labels: Vec<u8> = (0..count).map(|i| (i % NUM_CLASSES) as u8).collect();

    Split::from_raw(&pixels, &labels).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bytes_are_scaled_into_unit_range() {
        let mut pixels = vec![0u8; 2 * IMAGE_LEN];
        pixels[0] = 255;
        pixels[IMAGE_LEN + 1] = 51;
        let split = Split::from_raw(&pixels, &[3, 7]).unwrap();

        assert_eq!(split.images().dim(), (2, 28, 28, 1));
        assert_eq!(split.images()[[0, 0, 0, 0]], 1.0);
        assert!((split.images()[[1, 0, 1, 0]] - 0.2).abs() < 1e-6);
        assert!(split.images().iter().all(|x| (0.0..=1.0).contains(x)));
        assert_eq!(split.labels().to_vec(), vec![3, 7]);
    }

    #[test]
    fn raw_length_mismatch_is_rejected() {
        let pixels = vec![0u8; IMAGE_LEN + 1];
        let err = Split::from_raw(&pixels, &[1]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn missing_files_are_reported_without_download() {
        let err = load("this-directory-does-not-exist/", false).unwrap_err();
        match err {
            Error::DataUnavailable(path) => {
                assert!(path.ends_with("train-images-idx3-ubyte"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn splits_must_hold_the_expected_count() {
        let split = synthetic(12, 4);
        assert!(expect_len("test split", &split, 12).is_ok());

        let err = expect_len("training split", &split, TRAIN_LEN).unwrap_err();
        match err {
            Error::ShapeMismatch { context, expected, found } => {
                assert_eq!(context, "training split");
                assert_eq!(expected, vec![TRAIN_LEN]);
                assert_eq!(found, vec![12]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sequential_batches_cover_split_with_short_tail() {
        let split = synthetic(150, 1);
        let sizes: Vec<usize> = split.batches(64).map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![64, 64, 22]);

        let last = split.batches(64).last().unwrap();
        assert_eq!(last.images.dim(), (22, 28, 28, 1));
        assert_eq!(last.labels[0], split.labels()[128]);
    }

    #[test]
    fn subset_keeps_images_and_labels_aligned() {
        let split = synthetic(100, 2);
        let subset = split.subset(10..20);

        assert_eq!(subset.len(), 10);
        assert_eq!(subset.labels()[0], split.labels()[10]);
        assert_eq!(
            subset.images().index_axis(Axis(0), 3),
            split.images().index_axis(Axis(0), 13)
        );
    }

    #[test]
    fn layout_check_catches_bad_shapes_and_labels() {
        let split = synthetic(4, 3);
        assert!(split.check_layout("test").is_ok());

        let wide = Split::new(Array4::zeros((2, 28, 30, 1)), Array1::from(vec![0, 1])).unwrap();
        assert!(matches!(
            wide.check_layout("test"),
            Err(Error::ShapeMismatch { .. })
        ));

        let labels = Array1::from(vec![0, 10]);
        let bad_label = Split::new(Array4::zeros((2, 28, 28, 1)), labels).unwrap();
        assert!(matches!(
            bad_label.check_layout("test"),
            Err(Error::LabelOutOfRange { index: 1, label: 10, .. })
        ));

        assert!(Split::new(Array4::zeros((2, 28, 28, 1)), Array1::from(vec![0])).is_err());
    }
}
