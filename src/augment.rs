use burn::config::Config;
use log::{debug, info};
use ndarray::{array, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::dataset::{Batch, Split};
use crate::error::{self, Error};

const STD_EPSILON: f32 = 1e-6;

/// Bounds for the random perturbation applied to every training image.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees, either direction.
    #[config(default = 10.0)]
    pub rotation_degrees: f64,
    /// Maximum horizontal shift as a fraction of the image width, in `[0, 1)`.
    #[config(default = 0.1)]
    pub width_shift_fraction: f64,
    /// Maximum vertical shift as a fraction of the image height, in `[0, 1)`.
    #[config(default = 0.1)]
    pub height_shift_fraction: f64,
    /// Maximum shear angle in degrees, counter-clockwise.
    #[config(default = 0.1)]
    pub shear_intensity: f64,
    /// Zoom factors are drawn from `[1 - zoom, 1 + zoom]`, in `[0, 1)`.
    #[config(default = 0.1)]
    pub zoom_fraction: f64,
    #[config(default = false)]
    pub featurewise_center: bool,
    #[config(default = false)]
    pub featurewise_std_normalization: bool,
}

impl AugmentationConfig {
    pub fn validate(&self) -> error::Result<()> {
        let bounded = [
            ("width_shift_fraction", self.width_shift_fraction),
            ("height_shift_fraction", self.height_shift_fraction),
            ("zoom_fraction", self.zoom_fraction),
        ];
        let unbounded = [
            ("rotation_degrees", self.rotation_degrees),
            ("shear_intensity", self.shear_intensity),
        ];

        for &(name, value) in unbounded.iter().chain(bounded.iter()) {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidAugmentation { name, value });
            }
        }
        for &(name, value) in bounded.iter() {
            if value >= 1.0 {
                return Err(Error::InvalidAugmentation { name, value });
            }
        }

        Ok(())
    }

    fn needs_stats(&self) -> bool {
        self.featurewise_center || self.featurewise_std_normalization
    }
}

/// Per-channel statistics over the whole training set.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

/// Homogeneous 2D transform mapping output `(row, col)` coordinates to the
/// input coordinates they are sampled from.
#[derive(Clone, Debug)]
pub struct AffineTransform {
    matrix: Array2<f64>,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Array2::eye(3),
        }
    }

    /// Composes rotation, shift, shear and zoom, in that order, about the
    /// centre of a `height` x `width` image. Angles are in degrees, shifts in
    /// pixels.
    pub fn compose(
        rotation: f64,
        row_shift: f64,
        col_shift: f64,
        shear: f64,
        zoom: (f64, f64),
        height: usize,
        width: usize,
    ) -> Self {
        let (sin, cos) = rotation.to_radians().sin_cos();
        let rotation = array![[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]];
        let shift = array![[1.0, 0.0, row_shift], [0.0, 1.0, col_shift], [0.0, 0.0, 1.0]];
        let (shear_sin, shear_cos) = shear.to_radians().sin_cos();
        let shear = array![[1.0, -shear_sin, 0.0], [0.0, shear_cos, 0.0], [0.0, 0.0, 1.0]];
        let zoom = array![[zoom.0, 0.0, 0.0], [0.0, zoom.1, 0.0], [0.0, 0.0, 1.0]];

        let matrix = rotation.dot(&shift).dot(&shear).dot(&zoom);

        let o_row = height as f64 / 2.0 - 0.5;
        let o_col = width as f64 / 2.0 - 0.5;
        let offset = array![[1.0, 0.0, o_row], [0.0, 1.0, o_col], [0.0, 0.0, 1.0]];
        let reset = array![[1.0, 0.0, -o_row], [0.0, 1.0, -o_col], [0.0, 0.0, 1.0]];

        Self {
            matrix: offset.dot(&matrix).dot(&reset),
        }
    }

    /// Resamples one channel with bilinear interpolation, clamping source
    /// coordinates to the nearest edge pixel.
    pub fn apply(&self, channel: ArrayView2<f32>) -> Array2<f32> {
        let m = &self.matrix;
        let (height, width) = channel.dim();

        Array2::from_shape_fn((height, width), |(row, col)| {
            let (r, c) = (row as f64, col as f64);
            let src_row = m[[0, 0]] * r + m[[0, 1]] * c + m[[0, 2]];
            let src_col = m[[1, 0]] * r + m[[1, 1]] * c + m[[1, 2]];
            bilinear(&channel, src_row, src_col)
        })
    }
}

fn bilinear(channel: &ArrayView2<f32>, row: f64, col: f64) -> f32 {
    let (height, width) = channel.dim();
    let row = row.clamp(0.0, (height - 1) as f64);
    let col = col.clamp(0.0, (width - 1) as f64);

    let (r0, c0) = (row.floor() as usize, col.floor() as usize);
    let (r1, c1) = ((r0 + 1).min(height - 1), (c0 + 1).min(width - 1));
    let (fr, fc) = ((row - r0 as f64) as f32, (col - c0 as f64) as f32);

    let top = channel[[r0, c0]] * (1.0 - fc) + channel[[r0, c1]] * fc;
    let bottom = channel[[r1, c0]] * (1.0 - fc) + channel[[r1, c1]] * fc;
    top * (1.0 - fr) + bottom * fr
}

pub struct ImageAugmenter {
    config: AugmentationConfig,
    stats: Option<FeatureStats>,
}

impl ImageAugmenter {
    pub fn new(config: AugmentationConfig) -> error::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stats: None,
        })
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    pub fn stats(&self) -> Option<&FeatureStats> {
        self.stats.as_ref()
    }

    /// One pass over `images` (`[N, H, W, C]`) collecting the per-channel
    /// mean and standard deviation used for featurewise standardization.
    pub fn fit(&mut self, images: &Array4<f32>) {
        let channels = images.len_of(Axis(3));
        let mut mean = Vec::with_capacity(channels);
        let mut std = Vec::with_capacity(channels);

        for channel in images.axis_iter(Axis(3)) {
            mean.push(channel.mean().unwrap_or(0.0));
            std.push(channel.std(0.0));
        }

        info!("Fitted augmentation statistics: mean {:?}, std {:?}", mean, std);
        self.stats = Some(FeatureStats { mean, std });
    }

    pub fn sample_transform<R: Rng>(
        &self,
        rng: &mut R,
        height: usize,
        width: usize,
    ) -> AffineTransform {
        let config = &self.config;
        let rotation = symmetric(rng, config.rotation_degrees);
        let row_shift = symmetric(rng, config.height_shift_fraction) * height as f64;
        let col_shift = symmetric(rng, config.width_shift_fraction) * width as f64;
        let shear = symmetric(rng, config.shear_intensity);
        let zoom = if config.zoom_fraction > 0.0 {
            let low = 1.0 - config.zoom_fraction;
            let high = 1.0 + config.zoom_fraction;
            (rng.gen_range(low..high), rng.gen_range(low..high))
        } else {
            (1.0, 1.0)
        };

        AffineTransform::compose(rotation, row_shift, col_shift, shear, zoom, height, width)
    }

    /// Applies a freshly sampled transform to a `[H, W, C]` image, then the
    /// featurewise standardization if configured.
    pub fn augment<R: Rng>(
        &self,
        image: ArrayView3<f32>,
        rng: &mut R,
    ) -> error::Result<Array3<f32>> {
        let (height, width, _) = image.dim();
        let transform = self.sample_transform(rng, height, width);

        let mut output = Array3::zeros(image.raw_dim());
        let channels = image.axis_iter(Axis(2)).zip(output.axis_iter_mut(Axis(2)));
        for (source, mut target) in channels {
            target.assign(&transform.apply(source));
        }

        self.standardize(&mut output)?;
        Ok(output)
    }

    pub fn standardize(&self, image: &mut Array3<f32>) -> error::Result<()> {
        if !self.config.needs_stats() {
            return Ok(());
        }
        let stats = self.stats.as_ref().ok_or(Error::NotFitted)?;

        for (index, mut channel) in image.axis_iter_mut(Axis(2)).enumerate() {
            if self.config.featurewise_center {
                channel -= stats.mean[index];
            }
            if self.config.featurewise_std_normalization {
                channel /= stats.std[index] + STD_EPSILON;
            }
        }
        Ok(())
    }

    /// Infinite stream of shuffled, augmented batches over `split`.
    pub fn flow<'a>(
        &'a self,
        split: &'a Split,
        batch_size: usize,
        seed: u64,
    ) -> error::Result<AugmentedBatches<'a>> {
        if self.config.needs_stats() && self.stats.is_none() {
            return Err(Error::NotFitted);
        }
        if split.is_empty() || batch_size == 0 {
            return Err(Error::EmptyFlow {
                len: split.len(),
                batch_size,
            });
        }

        let mut batches = AugmentedBatches {
            augmenter: self,
            split,
            batch_size,
            rng: StdRng::seed_from_u64(seed),
            order: (0..split.len()).collect(),
            position: 0,
            passes: 0,
        };
        batches.reset();
        Ok(batches)
    }
}

fn symmetric<R: Rng>(rng: &mut R, bound: f64) -> f64 {
    if bound > 0.0 {
        rng.gen_range(-bound..bound)
    } else {
        0.0
    }
}

pub struct AugmentedBatches<'a> {
    augmenter: &'a ImageAugmenter,
    split: &'a Split,
    batch_size: usize,
    rng: StdRng,
    order: Vec<usize>,
    position: usize,
    passes: usize,
}

impl<'a> AugmentedBatches<'a> {
    pub fn batches_per_pass(&self) -> usize {
        self.split.len().div_ceil(self.batch_size)
    }

    /// Number of passes started so far, including the current one.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Starts a new pass with a fresh shuffle.
    pub fn reset(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.position = 0;
        self.passes += 1;
        debug!("Augmentation pass {} started", self.passes);
    }

    fn next_batch(&mut self) -> error::Result<Batch> {
        if self.position >= self.order.len() {
            self.reset();
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let mut batch = self.split.select(&self.order[self.position..end]);
        self.position = end;

        for mut image in batch.images.outer_iter_mut() {
            let augmented = self.augmenter.augment(image.view(), &mut self.rng)?;
            image.assign(&augmented);
        }
        Ok(batch)
    }
}

impl<'a> Iterator for AugmentedBatches<'a> {
    type Item = error::Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}
