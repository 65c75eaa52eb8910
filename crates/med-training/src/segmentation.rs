//! Segmentation strategy: paired image/mask training and pixel-metric evaluation.
//!
//! Expected layout:
//!
//! ```text
//! train_dir/image/<file>    test_dir/image/<file>
//! train_dir/mask/<file>     test_dir/mask/<file>   (optional)
//! ```

use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    tensor::{activation::sigmoid, backend::AutodiffBackend, backend::Backend, ElementConversion},
};
use image::DynamicImage;
use med_core::{
    Error, MetricAccumulator, PixelMap, Result, RunConfig, SegmentationScores, BACKGROUND,
    FOREGROUND,
};
use med_dataset::{
    list_images, paired_samples, resize_mask, to_binary_mask, ImageLoader, ProcessedImage,
};
use tracing::{debug, info, warn};

use crate::loss::segmentation_loss;
use crate::model::SegmentationModel;
use crate::trainer::{
    epoch_order, require_index, BaseTrainer, EvaluationReport, LossTracker, SegmentationReport,
    SessionState, TrainSummary, Trainer,
};
use crate::visualizer::{write_segmentation_frame, DemoWriter, FrameLayout};

const CONTEXT: &str = "SegmentationTrainer";
const IMAGE_DIR: &str = "image";
const MASK_DIR: &str = "mask";

/// Trainer for pixel-wise binary segmentation
pub struct SegmentationTrainer<'a, B: AutodiffBackend, M: AutodiffModule<B>> {
    base: BaseTrainer<'a, B, M>,
    train_dir: PathBuf,
    test_dir: Option<PathBuf>,
    train_files: Vec<PathBuf>,
    test_files: Vec<PathBuf>,
    metrics: MetricAccumulator,
    state: SessionState,
}

impl<'a, B, M> SegmentationTrainer<'a, B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    /// Checks the directory layout; nothing is listed until [`Trainer::load_index`].
    pub fn new(model: &'a mut M, config: &'a RunConfig, device: B::Device) -> Result<Self> {
        let train_dir = config
            .train_dir
            .clone()
            .ok_or_else(|| Error::config(CONTEXT, "missing train directory"))?;

        for sub in [IMAGE_DIR, MASK_DIR] {
            let dir = train_dir.join(sub);
            if !dir.is_dir() {
                return Err(Error::config(
                    CONTEXT,
                    format!("missing {} directory", dir.display()),
                ));
            }
        }

        if let Some(test_dir) = &config.test_dir {
            let dir = test_dir.join(IMAGE_DIR);
            if !dir.is_dir() {
                return Err(Error::config(
                    CONTEXT,
                    format!("missing {} directory", dir.display()),
                ));
            }
        }

        Ok(Self {
            base: BaseTrainer::new(model, config, device),
            train_dir,
            test_dir: config.test_dir.clone(),
            train_files: Vec::new(),
            test_files: Vec::new(),
            metrics: MetricAccumulator::new(),
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

    pub fn train_files(&self) -> &[PathBuf] {
        &self.train_files
    }

    pub fn test_files(&self) -> &[PathBuf] {
        &self.test_files
    }

    fn train_loaders(&self) -> Result<(ImageLoader, ImageLoader)> {
        let size = self.base.config().input_size();
        Ok((
            ImageLoader::new(self.train_dir.join(IMAGE_DIR), size)?,
            ImageLoader::new(self.train_dir.join(MASK_DIR), size)?,
        ))
    }
}

impl<'a, B, M> Trainer for SegmentationTrainer<'a, B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    fn load_index(&mut self) -> Result<()> {
        self.train_files = paired_samples(
            &self.train_dir.join(IMAGE_DIR),
            &self.train_dir.join(MASK_DIR),
        )?
        .into_iter()
        .map(|sample| sample.file)
        .collect();

        self.test_files = match &self.test_dir {
            Some(dir) => list_images(&dir.join(IMAGE_DIR))?
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            None => Vec::new(),
        };

        info!(
            "Indexed {} training pairs and {} test images",
            self.train_files.len(),
            self.test_files.len()
        );
        self.state = SessionState::IndexLoaded;
        Ok(())
    }

    fn train(&mut self) -> Result<TrainSummary> {
        require_index(self.state, CONTEXT)?;
        self.state = SessionState::Training;

        let config = self.base.config();
        let (image_loader, mask_loader) = self.train_loaders()?;
        let mut optimizer = self.base.make_optimizer();
        let mut rng = self.base.epoch_rng();
        let total = self.train_files.len();
        let mut summary = TrainSummary {
            epochs: config.epochs,
            samples: total,
            ..Default::default()
        };

        for epoch in 1..=config.epochs {
            let mut losses = LossTracker::default();

            for (batch, index) in epoch_order(total, rng.as_mut()).into_iter().enumerate() {
                let file = &self.train_files[index];
                let pair = image_loader
                    .load_cached(file)
                    .and_then(|image| Ok((image, mask_loader.load_cached(file)?)));
                let (image, mask) = match pair {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Skipping {}: {e}", file.display());
                        summary.skipped += 1;
                        continue;
                    }
                };

                let device = self.base.device();
                let input = image.to_tensor::<B>(device).unsqueeze::<4>();
                let target = mask.to_tensor::<B>(device).unsqueeze::<4>();

                let logits = self.base.model().predict(input);
                let loss = segmentation_loss(logits, target, config.bce_pos_weight);
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
        self.metrics.reset();

        let test_dir = match &self.test_dir {
            Some(dir) if !self.test_files.is_empty() => dir.clone(),
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
        let size = config.input_size();
        let video = &config.video;
        let image_loader = ImageLoader::new(test_dir.join(IMAGE_DIR), size)?;
        let mask_dir = test_dir.join(MASK_DIR);

        let layout = FrameLayout::new(size, 3, video.label_height);
        let mut writer = if video.enabled {
            DemoWriter::create(&config.demo_video_path(), layout.frame_size(), video.fps)?
        } else {
            DemoWriter::closed(layout.frame_size())
        };

        let model = self.base.model().valid();
        let device = self.base.device();

        for file in &self.test_files {
            let processed = match image_loader.load_cached(file) {
                Ok(processed) => processed,
                Err(e) => {
                    warn!("Skipping {}: {e}", file.display());
                    continue;
                }
            };

            let scored =
                score_sample::<B::InnerBackend, _>(&model, &processed, &mask_dir.join(file), device);
            let (prediction, ground_truth, scores) = match scored {
                Ok(Some(scored)) => scored,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping {}: {e}", file.display());
                    continue;
                }
            };
            debug!("{}: dice={:.4} iou={:.4}", file.display(), scores.dice, scores.iou);
            self.metrics.push(scores);

            if writer.is_open() {
                let original = match image_loader.load_raw(file) {
                    Ok(original) => original,
                    Err(e) => {
                        warn!("No demo frame for {}: {e}", file.display());
                        continue;
                    }
                };
                write_segmentation_frame(
                    &mut writer,
                    &original,
                    &ground_truth,
                    &prediction,
                    video.label_height,
                    video.hold_frames,
                )?;
            }
        }

        let frames = writer.finish()?;
        if frames > 0 {
            info!("Wrote {frames} demo frames to {}", config.demo_video_path().display());
        }

        self.state = SessionState::Evaluated;
        Ok(EvaluationReport::Segmentation(SegmentationReport {
            evaluated: self.metrics.count(),
            means: self.metrics.means(),
        }))
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

/// Thresholded prediction, normalized ground truth and their scores.
///
/// Returns `None` when the ground-truth mask does not exist.
fn score_sample<B: Backend, M: SegmentationModel<B>>(
    model: &M,
    processed: &ProcessedImage,
    mask_path: &Path,
    device: &B::Device,
) -> Result<Option<(PixelMap, PixelMap, SegmentationScores)>> {
    if !mask_path.is_file() {
        warn!("Ground truth not found for {}; skipping", mask_path.display());
        return Ok(None);
    }
    let ground_truth = to_binary_mask(&read_image(mask_path)?);

    let logits = model.predict(processed.to_tensor::<B>(device).unsqueeze::<4>());
    let probabilities: Vec<f32> = sigmoid(logits)
        .into_data()
        .to_vec()
        .map_err(|e| Error::processing("predict", format!("{e:?}")))?;

    let prediction = PixelMap::new(
        processed.width,
        processed.height,
        probabilities
            .iter()
            .map(|&p| if p >= 0.5 { FOREGROUND } else { BACKGROUND })
            .collect(),
    );

    let prediction = resize_mask(&prediction, ground_truth.width, ground_truth.height);
    let scores = SegmentationScores::compute(&prediction, &ground_truth);
    Ok(Some((prediction, ground_truth, scores)))
}

fn read_image(path: &Path) -> Result<DynamicImage> {
    image::ImageReader::open(path)
        .map_err(|e| Error::read(path, e))?
        .with_guessed_format()
        .map_err(|e| Error::read(path, e))?
        .decode()
        .map_err(|e| Error::read(path, e))
}
