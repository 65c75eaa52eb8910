//! Shared trainer lifecycle: optimizer stepping, progress and reports.
//!
//! A session moves through `Constructed -> IndexLoaded -> Training -> Evaluated`.
//! Training and evaluation both require a loaded index.

use std::fmt;

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Tensor},
};
use med_core::{ConfusionCounts, Error, ProgressReporter, Result, RunConfig, SegmentationScores};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Lifecycle position of a trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Constructed,
    IndexLoaded,
    Training,
    Evaluated,
}

impl SessionState {
    pub fn has_index(&self) -> bool {
        !matches!(self, SessionState::Constructed)
    }
}

/// Errors with a configuration error unless the index has been loaded.
pub fn require_index(state: SessionState, context: &str) -> Result<()> {
    if state.has_index() {
        Ok(())
    } else {
        Err(Error::config(context, "load_index must be called first"))
    }
}

/// A training strategy driven by the command-line tool
pub trait Trainer {
    /// Builds the sorted train and test lists.
    fn load_index(&mut self) -> Result<()>;

    /// Runs every configured epoch over the train list.
    fn train(&mut self) -> Result<TrainSummary>;

    /// Scores the model on the test list.
    fn evaluate(&mut self) -> Result<EvaluationReport>;

    fn state(&self) -> SessionState;
}

/// Outcome of [`Trainer::train`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainSummary {
    pub epochs: usize,
    /// Samples in the train list
    pub samples: usize,
    /// Sample loads skipped over all epochs
    pub skipped: usize,
    /// Mean loss of the last epoch, if any sample was trained on
    pub final_avg_loss: Option<f64>,
}

/// Segmentation evaluation outcome
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationReport {
    pub evaluated: usize,
    pub means: Option<SegmentationScores>,
}

/// Classification evaluation outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub correct: usize,
    pub total: usize,
    /// Label confusion with class 1 as positive, for two-class runs
    pub binary: Option<ConfusionCounts>,
}

impl ClassificationReport {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Outcome of [`Trainer::evaluate`]
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationReport {
    /// No test directory was configured
    Skipped,
    Segmentation(SegmentationReport),
    Classification(ClassificationReport),
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationReport::Skipped => write!(f, "Evaluation skipped (no test directory)"),
            EvaluationReport::Segmentation(report) => match &report.means {
                Some(means) => {
                    writeln!(f, "=== Test results over {} images ===", report.evaluated)?;
                    write!(f, "{means}")
                }
                None => write!(f, "No test images were evaluated"),
            },
            EvaluationReport::Classification(report) => {
                write!(
                    f,
                    "Classification accuracy: {:.2}% ({}/{})",
                    report.accuracy() * 100.0,
                    report.correct,
                    report.total
                )?;
                if let Some(counts) = &report.binary {
                    write!(
                        f,
                        "\n  Precision: {:.4}\n  Recall:    {:.4}\n  F1:        {:.4}",
                        counts.precision(),
                        counts.recall(),
                        counts.f1()
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// State shared by the concrete trainers
pub struct BaseTrainer<'a, B: AutodiffBackend, M: AutodiffModule<B>> {
    model: &'a mut M,
    config: &'a RunConfig,
    device: B::Device,
    progress: ProgressReporter,
}

impl<'a, B: AutodiffBackend, M: AutodiffModule<B>> BaseTrainer<'a, B, M> {
    pub fn new(model: &'a mut M, config: &'a RunConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
            progress: ProgressReporter::new(config.progress_bar_width),
        }
    }

    pub fn model(&self) -> &M {
        self.model
    }

    pub fn config(&self) -> &'a RunConfig {
        self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Adam optimizer for the model type
    pub fn make_optimizer(&self) -> impl Optimizer<M, B> {
        AdamConfig::new().init()
    }

    /// Backpropagates `loss` and applies one optimizer update to the model.
    pub fn step<O: Optimizer<M, B>>(&mut self, optimizer: &mut O, loss: Tensor<B, 1>) {
        let grads = GradientsParams::from_grads(loss.backward(), &*self.model);
        *self.model = optimizer.step(self.config.learning_rate, self.model.clone(), grads);
    }

    /// Redraws the progress bar with an epoch/batch/loss message.
    pub fn print_progress(&mut self, epoch: usize, current: usize, total: usize, avg_loss: f64) {
        let message = format!(
            "Epoch {}/{}, Batch {}/{}, AvgLoss={:.4}",
            epoch, self.config.epochs, current, total, avg_loss
        );
        self.progress.update(current as u64, total as u64, message);
    }

    pub fn finish_progress(&mut self) {
        self.progress.finish();
    }

    /// Per-run shuffler, present only when a shuffle seed is configured
    pub fn epoch_rng(&self) -> Option<ChaCha8Rng> {
        self.config.shuffle_seed.map(ChaCha8Rng::seed_from_u64)
    }
}

/// Sample order for one epoch: index order, or a seeded shuffle.
pub fn epoch_order(len: usize, rng: Option<&mut ChaCha8Rng>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if let Some(rng) = rng {
        order.shuffle(rng);
    }
    order
}

/// Running mean of the losses seen in one epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct LossTracker {
    sum: f64,
    count: usize,
}

impl LossTracker {
    pub fn push(&mut self, loss: f64) {
        self.sum += loss;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}
