//! Classification strategy: one folder per class, cross-entropy training and
//! argmax evaluation.

use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Int, Tensor},
};
use med_core::{label_confusion, Error, Result, RunConfig};
use med_dataset::{ClassIndex, ImageLoader, ProcessedImage, SampleEntry};
use tracing::{debug, info, warn};

use crate::model::ClassificationModel;
use crate::trainer::{
    epoch_order, require_index, BaseTrainer, ClassificationReport, EvaluationReport, LossTracker,
    SessionState, TrainSummary, Trainer,
};
use crate::visualizer::{write_classification_frame, DemoWriter, FrameLayout};

const CONTEXT: &str = "ClassificationTrainer";

/// `[1, H, W]` grayscale map as a `[1, 3, H, W]` batch
fn to_rgb_batch<B: Backend>(image: &ProcessedImage, device: &B::Device) -> Tensor<B, 4> {
    let x = image.to_tensor::<B>(device).unsqueeze::<4>();
    Tensor::cat(vec![x.clone(), x.clone(), x], 1)
}

/// One loader per class folder under `root`; `None` where the folder is missing
fn class_loaders(
    root: &Path,
    classes: &ClassIndex,
    config: &RunConfig,
) -> Result<Vec<Option<ImageLoader>>> {
    classes
        .names()
        .iter()
        .map(|class| {
            let dir = root.join(class);
            if dir.is_dir() {
                ImageLoader::new(dir, config.input_size()).map(Some)
            } else {
                Ok(None)
            }
        })
        .collect()
}

/// Loads a sample through the loader of its class.
fn load_sample(loaders: &[Option<ImageLoader>], sample: &SampleEntry) -> Result<ProcessedImage> {
    let label = sample
        .label
        .ok_or_else(|| Error::processing("load", "sample has no label"))?;
    let loader = loaders
        .get(label)
        .and_then(Option::as_ref)
        .ok_or_else(|| Error::processing("load", format!("no loader for class {label}")))?;
    let name = sample.file.file_name().map(PathBuf::from).unwrap_or_default();
    loader.load_cached(name)
}

/// Trainer for whole-image classification
pub struct ClassificationTrainer<'a, B: AutodiffBackend, M: AutodiffModule<B>> {
    base: BaseTrainer<'a, B, M>,
    classes: ClassIndex,
    train_dir: PathBuf,
    test_dir: Option<PathBuf>,
    train_samples: Vec<SampleEntry>,
    test_samples: Vec<SampleEntry>,
    state: SessionState,
}

impl<'a, B, M> ClassificationTrainer<'a, B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ClassificationModel<B>,
    M::InnerModule: ClassificationModel<B::InnerBackend>,
{
    /// Discovers the classes under the train directory.
    pub fn new(model: &'a mut M, config: &'a RunConfig, device: B::Device) -> Result<Self> {
        let train_dir = config
            .train_dir
            .clone()
            .ok_or_else(|| Error::config(CONTEXT, "missing train directory"))?;
        let classes = ClassIndex::discover(&train_dir)?;

        if model.num_classes() != classes.len() {
            return Err(Error::config(
                CONTEXT,
                format!(
                    "model has {} outputs but {} classes were found",
                    model.num_classes(),
                    classes.len()
                ),
            ));
        }

        info!("Classes: {}", classes.names().join(", "));
        Ok(Self {
            base: BaseTrainer::new(model, config, device),
            classes,
            train_dir,
            test_dir: config.test_dir.clone(),
            train_samples: Vec::new(),
            test_samples: Vec::new(),
            state: SessionState::Constructed,
        })
    }

    /// [`Self::new`] followed by [`Trainer::load_index`]
    pub fn open(model: &'a mut M, config: &'a RunConfig, device: B::Device) -> Result<Self> {
        let mut trainer = Self::new(model, config, device)?;
        trainer.load_index()?;
        Ok(trainer)
    }

    pub fn model(&self) -> &M {
        self.base.model()
    }

    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    pub fn train_samples(&self) -> &[SampleEntry] {
        &self.train_samples
    }

    pub fn test_samples(&self) -> &[SampleEntry] {
        &self.test_samples
    }

    fn class_name(&self, label: usize) -> &str {
        self.classes.name(label).unwrap_or("?")
    }
}

impl<'a, B, M> Trainer for ClassificationTrainer<'a, B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ClassificationModel<B>,
    M::InnerModule: ClassificationModel<B::InnerBackend>,
{
    fn load_index(&mut self) -> Result<()> {
        self.train_samples = self.classes.samples(&self.train_dir)?;
        self.test_samples = match &self.test_dir {
            Some(dir) if dir.is_dir() => self.classes.samples(dir)?,
            Some(dir) => return Err(Error::read(dir, "test directory not found")),
            None => Vec::new(),
        };

        info!(
            "Indexed {} training and {} test samples over {} classes",
            self.train_samples.len(),
            self.test_samples.len(),
            self.classes.len()
        );
        self.state = SessionState::IndexLoaded;
        Ok(())
    }

    fn train(&mut self) -> Result<TrainSummary> {
        require_index(self.state, CONTEXT)?;
        self.state = SessionState::Training;

        let config = self.base.config();
        let loaders = class_loaders(&self.train_dir, &self.classes, config)?;
        let loss_fn = CrossEntropyLossConfig::new().init(self.base.device());
        let mut optimizer = self.base.make_optimizer();
        let mut rng = self.base.epoch_rng();
        let total = self.train_samples.len();
        let mut summary = TrainSummary {
            epochs: config.epochs,
            samples: total,
            ..Default::default()
        };

        for epoch in 1..=config.epochs {
            let mut losses = LossTracker::default();

            for (batch, index) in epoch_order(total, rng.as_mut()).into_iter().enumerate() {
                let sample = &self.train_samples[index];
                let (image, label) = match load_sample(&loaders, sample) {
                    Ok(image) => (image, sample.label.unwrap_or_default()),
                    Err(e) => {
                        warn!("Skipping {}: {e}", sample.file.display());
                        summary.skipped += 1;
                        continue;
                    }
                };

                let device = self.base.device();
                let input = to_rgb_batch::<B>(&image, device);
                let target = Tensor::<B, 1, Int>::from_ints([label as i32], device);

                let logits = self.base.model().predict(input);
                let loss = loss_fn.forward(logits, target);
                losses.push(loss.clone().into_scalar().elem::<f64>());
                self.base.step(&mut optimizer, loss);

                let avg = losses.mean().unwrap_or_default();
                self.base.print_progress(epoch, batch + 1, total, avg);
            }

            self.base.finish_progress();
            match losses.mean() {
                Some(avg) => info!("Epoch {epoch}/{} complete, AvgLoss={avg:.4}", config.epochs),
                None => warn!("Epoch {epoch}/{}: no samples could be loaded", config.epochs),
            }
            summary.final_avg_loss = losses.mean();
        }

        Ok(summary)
    }

    fn evaluate(&mut self) -> Result<EvaluationReport> {
        require_index(self.state, CONTEXT)?;

        let test_dir = match &self.test_dir {
            Some(dir) if !self.test_samples.is_empty() => dir.clone(),
            Some(dir) => {
                info!("No test images found in {}; skipping evaluation.", dir.display());
                self.state = SessionState::Evaluated;
                return Ok(EvaluationReport::Skipped);
            }
            None => {
                info!("No test directory provided; skipping evaluation.");
                self.state = SessionState::Evaluated;
                return Ok(EvaluationReport::Skipped);
            }
        };

        let config = self.base.config();
        let video = &config.video;
        let loaders = class_loaders(&test_dir, &self.classes, config)?;

        let layout = FrameLayout::new(config.input_size(), 1, video.label_height);
        let mut writer = if video.enabled {
            DemoWriter::create(&config.demo_video_path(), layout.frame_size(), video.fps)?
        } else {
            DemoWriter::closed(layout.frame_size())
        };

        let model = self.base.model().valid();
        let device = self.base.device();
        let mut predicted = Vec::new();
        let mut expected = Vec::new();

        for sample in &self.test_samples {
            let image = match load_sample(&loaders, sample) {
                Ok(image) => image,
                Err(e) => {
                    warn!("Skipping {}: {e}", sample.file.display());
                    continue;
                }
            };
            let truth = sample.label.unwrap_or_default();

            let logits = model.predict(to_rgb_batch::<B::InnerBackend>(&image, device));
            let guess = logits.argmax(1).into_scalar().elem::<i64>() as usize;
            debug!(
                "{}: true={} pred={}",
                sample.file.display(),
                self.class_name(truth),
                self.class_name(guess)
            );
            predicted.push(guess);
            expected.push(truth);

            if writer.is_open() {
                let caption = format!(
                    "True: {} | Pred: {}",
                    self.class_name(truth),
                    self.class_name(guess)
                );
                let original = loaders
                    .get(truth)
                    .and_then(Option::as_ref)
                    .map(|loader| loader.load_raw(sample.file.file_name().unwrap_or_default()));
                match original {
                    Some(Ok(original)) => write_classification_frame(
                        &mut writer,
                        &original,
                        &caption,
                        video.label_height,
                        video.hold_frames,
                    )?,
                    Some(Err(e)) => warn!("No demo frame for {}: {e}", sample.file.display()),
                    None => {}
                }
            }
        }

        let frames = writer.finish()?;
        if frames > 0 {
            info!("Wrote {frames} demo frames to {}", config.demo_video_path().display());
        }

        let correct = predicted.iter().zip(&expected).filter(|(p, t)| p == t).count();
        let binary = (self.classes.len() == 2).then(|| {
            let to_u8 = |labels: &[usize]| labels.iter().map(|&l| l as u8).collect::<Vec<_>>();
            label_confusion(&to_u8(&predicted), &to_u8(&expected))
        });

        self.state = SessionState::Evaluated;
        Ok(EvaluationReport::Classification(ClassificationReport {
            correct,
            total: expected.len(),
            binary,
        }))
    }

    fn state(&self) -> SessionState {
        self.state
    }
}
