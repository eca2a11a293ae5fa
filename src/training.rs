use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::log_softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor, TensorData,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use crate::augment::{AugmentationConfig, ImageAugmenter};
use crate::dataset::{Batch, Split, IMAGE_CHANNELS, IMAGE_HEIGHT, IMAGE_WIDTH, NUM_CLASSES};
use crate::error::{self, Error};
use crate::history::{EpochRecord, History};
use crate::network::{LeNet, LeNetConfig};

/// Scores are clamped into `[SCORE_EPSILON, 1 - SCORE_EPSILON]` before the log.
const SCORE_EPSILON: f32 = 1e-7;

const PROGRESS_TEMPLATE: &str = "{msg} [{bar:40}] {pos}/{len} ({eta})";

#[derive(Config)]
pub struct TrainingConfig {
    pub model: LeNetConfig,
    pub optimizer: AdamConfig,
    pub augmentation: AugmentationConfig,
    #[config(default = 5)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 256)]
    pub eval_batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = true)]
    pub progress: bool,
}

impl TrainingConfig {
    /// Setup of the reference run: LeNet, Adam and the default augmentation bounds.
    pub fn lenet() -> Self {
        Self::new(
            LeNetConfig::new(),
            AdamConfig::new().with_epsilon(1e-7),
            AugmentationConfig::new(),
        )
    }

    pub fn steps_per_epoch(&self, train_len: usize) -> usize {
        train_len.div_ceil(self.batch_size)
    }
}

/// Loss and accuracy averaged over every example seen.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Metrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// Sample-weighted running averages over an epoch or an evaluation pass.
#[derive(Default)]
struct MetricsAccumulator {
    loss_sum: f64,
    correct: f64,
    seen: usize,
}

impl MetricsAccumulator {
    fn update(&mut self, batch: Metrics, count: usize) {
        self.loss_sum += batch.loss * count as f64;
        self.correct += batch.accuracy * count as f64;
        self.seen += count;
    }

    fn finish(&self) -> Metrics {
        if self.seen == 0 {
            return Metrics::default();
        }
        Metrics {
            loss: self.loss_sum / self.seen as f64,
            accuracy: self.correct / self.seen as f64,
        }
    }
}

/// Sparse categorical cross-entropy over non-logit scores.
///
/// The scores are clamped, moved to log space and renormalized with a
/// log-softmax, so rows need not sum to one.
pub fn sparse_categorical_crossentropy<B: Backend>(
    scores: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let [batch_size, _] = scores.dims();
    let log_scores = scores.clamp(SCORE_EPSILON, 1.0 - SCORE_EPSILON).log();
    let log_probs = log_softmax(log_scores, 1);

    log_probs
        .gather(1, targets.reshape([batch_size, 1]))
        .neg()
        .mean()
}

fn count_correct<B: Backend>(scores: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions: Tensor<B, 1, Int> = scores.argmax(1).squeeze(1);
    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

pub fn batch_to_tensors<B: Backend>(
    batch: &Batch,
    device: &B::Device,
) -> (Tensor<B, 4>, Tensor<B, 1, Int>) {
    let (count, height, width, channels) = batch.images.dim();
    let pixels: Vec<f32> = batch.images.iter().copied().collect();
    let labels: Vec<i64> = batch.labels.iter().map(|label| *label as i64).collect();

    let shape = [count, height, width, channels];
    let images = Tensor::from_data(TensorData::new(pixels, shape), device);
    let targets = Tensor::from_data(TensorData::new(labels, [count]), device);
    (images, targets)
}

fn check_batch(batch: &Batch) -> error::Result<()> {
    let (count, height, width, channels) = batch.images.dim();
    if (height, width, channels) != (IMAGE_HEIGHT, IMAGE_WIDTH, IMAGE_CHANNELS)
        || count != batch.labels.len()
    {
        return Err(Error::ShapeMismatch {
            context: "training batch",
            expected: vec![batch.labels.len(), IMAGE_HEIGHT, IMAGE_WIDTH, IMAGE_CHANNELS],
            found: vec![count, height, width, channels],
        });
    }
    Ok(())
}

/// One pass of `model` over `split`, without gradients.
pub fn evaluate<B: Backend>(
    model: &LeNet<B>,
    split: &Split,
    batch_size: usize,
    device: &B::Device,
) -> error::Result<Metrics> {
    split.check_layout("evaluation split")?;

    let mut metrics = MetricsAccumulator::default();
    for batch in split.batches(batch_size) {
        let (images, targets) = batch_to_tensors::<B>(&batch, device);
        let scores = model.forward(images);
        let loss = sparse_categorical_crossentropy(scores.clone(), targets.clone());
        let correct = count_correct(scores, targets);

        let batch_metrics = Metrics {
            loss: loss.into_scalar().elem::<f64>(),
            accuracy: correct as f64 / batch.len() as f64,
        };
        metrics.update(batch_metrics, batch.len());
    }

    Ok(metrics.finish())
}

pub struct Trainer<B: AutodiffBackend, O> {
    model: LeNet<B>,
    optim: O,
    learning_rate: f64,
    device: B::Device,
    steps: usize,
    progress: bool,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LeNet<B>, B>,
{
    pub fn new(model: LeNet<B>, optim: O, learning_rate: f64, device: B::Device) -> Self {
        Self {
            model,
            optim,
            learning_rate,
            device,
            steps: 0,
            progress: false,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn into_model(self) -> LeNet<B> {
        self.model
    }

    /// Optimizer updates applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Forward, backward and a single optimizer update on `batch`.
    pub fn train_step(&mut self, batch: &Batch) -> error::Result<Metrics> {
        check_batch(batch)?;
        let (images, targets) = batch_to_tensors::<B>(batch, &self.device);
        let model = self.model.clone();

        let scores = model.forward(images);
        let loss = sparse_categorical_crossentropy(scores.clone(), targets.clone());
        let correct = count_correct(scores, targets);

        // Gradients for the current backward pass
        let grads = loss.backward();
        // Gradients linked to each parameter of the model.
        let grads = GradientsParams::from_grads(grads, &model);
        self.model = self.optim.step(self.learning_rate, model, grads);
        self.steps += 1;

        Ok(Metrics {
            loss: loss.into_scalar().elem::<f64>(),
            accuracy: correct as f64 / batch.len() as f64,
        })
    }

    /// Runs `num_epochs` epochs of `steps_per_epoch` batches each, validating
    /// on `validation` after every epoch.
    pub fn fit<I>(
        &mut self,
        batches: &mut I,
        steps_per_epoch: usize,
        num_epochs: usize,
        validation: &Split,
        eval_batch_size: usize,
    ) -> error::Result<History>
    where
        I: Iterator<Item = error::Result<Batch>>,
    {
        validation.check_layout("validation split")?;

        let mut history = History::new();
        for epoch in 0..num_epochs {
            let bar = self.progress_bar(steps_per_epoch, epoch, num_epochs)?;
            let mut metrics = MetricsAccumulator::default();

            for _ in 0..steps_per_epoch {
                let Some(batch) = batches.next() else {
                    warn!("Batch source exhausted during epoch {}", epoch + 1);
                    break;
                };
                let batch = batch?;
                let step = self.train_step(&batch)?;
                metrics.update(step, batch.len());
                bar.inc(1);
            }
            bar.finish_and_clear();

            let train = metrics.finish();
            let valid = evaluate(&self.model.valid(), validation, eval_batch_size, &self.device)?;
            let record = EpochRecord {
                train_loss: train.loss,
                train_accuracy: train.accuracy,
                val_loss: valid.loss,
                val_accuracy: valid.accuracy,
            };
            if !record.is_finite() {
                warn!("Non-finite metrics in epoch {}: {:?}", epoch + 1, record);
            }

            info!(
                "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                epoch + 1,
                num_epochs,
                record.train_loss,
                record.train_accuracy,
                record.val_loss,
                record.val_accuracy,
            );
            history.push(record);
        }

        Ok(history)
    }

    fn progress_bar(
        &self,
        steps: usize,
        epoch: usize,
        num_epochs: usize,
    ) -> error::Result<ProgressBar> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }
        let bar = ProgressBar::new(steps as u64);
        bar.set_style(ProgressStyle::with_template(PROGRESS_TEMPLATE)?);
        bar.set_message(format!("Epoch {}/{}", epoch + 1, num_epochs));
        Ok(bar)
    }
}

/// Fits the augmenter, then trains a fresh network on augmented batches of
/// `train`, validating against `test` after every epoch.
pub fn run<B: AutodiffBackend>(
    config: &TrainingConfig,
    train: &Split,
    test: &Split,
    device: &B::Device,
) -> error::Result<(LeNet<B>, History)> {
    if config.model.num_classes != NUM_CLASSES {
        return Err(Error::ShapeMismatch {
            context: "model output",
            expected: vec![NUM_CLASSES],
            found: vec![config.model.num_classes],
        });
    }
    train.check_layout("training split")?;
    test.check_layout("test split")?;

    B::seed(config.seed);

    let mut augmenter = ImageAugmenter::new(config.augmentation.clone())?;
    augmenter.fit(train.images());
    let mut batches = augmenter.flow(train, config.batch_size, config.seed)?;
    let steps_per_epoch = config.steps_per_epoch(train.len());
    info!(
        "Training on {} images for {} epochs, {} steps per epoch",
        train.len(),
        config.num_epochs,
        steps_per_epoch
    );

    let model = config.model.init::<B>(device);
    let optim = config.optimizer.init::<B, LeNet<B>>();
    let mut trainer = Trainer::new(model, optim, config.learning_rate, device.clone())
        .with_progress(config.progress);

    let history = trainer.fit(
        &mut batches,
        steps_per_epoch,
        config.num_epochs,
        test,
        config.eval_batch_size,
    )?;

    Ok((trainer.into_model(), history))
}
