//! Run configuration.
//!
//! A [`RunConfig`] is built once by the driver (TOML file plus command-line
//! overrides), validated, and then handed by reference to every component.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::DeviceKind;
use crate::types::{ImageDimensions, ModelKind, ResNetDepth};
use crate::{Error, Result};

/// Parameters of a single training/evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Model kind, which also selects the training strategy
    pub model: ModelKind,
    /// Training data root
    pub train_dir: Option<PathBuf>,
    /// Test data root (evaluation is skipped when absent)
    pub test_dir: Option<PathBuf>,
    /// Human-readable run name used for output files
    pub run_name: Option<String>,
    /// Weights to load before training
    pub weights: Option<PathBuf>,
    /// Skip training and only evaluate
    pub skip_training: bool,
    /// Requested compute device
    pub device: DeviceKind,
    /// Number of training epochs
    pub epochs: usize,
    /// Optimizer learning rate
    pub learning_rate: f64,
    /// Positive-class weight of the segmentation BCE term
    pub bce_pos_weight: f64,
    /// ResNet depth variant
    pub resnet_depth: ResNetDepth,
    /// Demo video settings
    pub video: VideoConfig,
    /// Width of the progress bar in characters
    pub progress_bar_width: usize,
    /// Square side of segmentation inputs
    pub segmentation_size: u32,
    /// Square side of classification inputs
    pub classification_size: u32,
    /// Shuffle samples every epoch with this seed (sorted order when absent)
    pub shuffle_seed: Option<u64>,
    /// Directory for weights, metadata and demo video
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Unet,
            train_dir: None,
            test_dir: None,
            run_name: None,
            weights: None,
            skip_training: false,
            device: DeviceKind::Cpu,
            epochs: 50,
            learning_rate: 1e-3,
            bce_pos_weight: 1.0,
            resnet_depth: ResNetDepth::R18,
            video: VideoConfig::default(),
            progress_bar_width: 50,
            segmentation_size: 256,
            classification_size: 224,
            shuffle_seed: None,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Demo video settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Whether evaluation writes a demo video
    pub enabled: bool,
    /// Frames per second
    pub fps: u32,
    /// Frames each sample is held on screen
    pub hold_frames: u32,
    /// Height of the caption band above each panel
    pub label_height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 1,
            hold_frames: 2,
            label_height: 50,
        }
    }
}

impl RunConfig {
    /// Run name, falling back to the model kind
    pub fn run_name(&self) -> String {
        self.run_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.model.default_name().to_string())
    }

    /// Where trained weights are written (the recorder adds its own extension)
    pub fn weights_output_path(&self) -> PathBuf {
        self.output_dir.join(self.run_name())
    }

    /// Metadata written next to the weights
    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.json", self.run_name()))
    }

    /// Demo video written by evaluation
    pub fn demo_video_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_demo.gif", self.run_name()))
    }

    /// Input size used by the configured strategy
    pub fn input_size(&self) -> ImageDimensions {
        if self.model.is_segmentation() {
            ImageDimensions::square(self.segmentation_size)
        } else {
            ImageDimensions::square(self.classification_size)
        }
    }

    /// Rejects parameter combinations no run can use
    pub fn validate(&self) -> Result<()> {
        if !self.skip_training && self.epochs == 0 {
            return Err(Error::config("config", "epochs must be greater than 0"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::config("config", "learning rate must be positive"));
        }
        if !(self.bce_pos_weight > 0.0) {
            return Err(Error::config("config", "BCE positive weight must be positive"));
        }
        if self.progress_bar_width == 0 {
            return Err(Error::config("config", "progress bar width must be at least 1"));
        }
        if self.segmentation_size == 0 || self.classification_size == 0 {
            return Err(Error::config("config", "input sizes must be non-zero"));
        }
        if self.video.enabled && (self.video.fps == 0 || self.video.hold_frames == 0) {
            return Err(Error::config(
                "config",
                "video fps and hold frames must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.epochs, 50);
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.bce_pos_weight, 1.0);
        assert_eq!(config.resnet_depth, ResNetDepth::R18);
        assert!(config.video.enabled);
        assert_eq!(config.video.fps, 1);
        assert_eq!(config.video.hold_frames, 2);
        assert_eq!(config.progress_bar_width, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_name_falls_back_to_model_kind() {
        let mut config = RunConfig {
            model: ModelKind::Resnet,
            ..Default::default()
        };
        assert_eq!(config.run_name(), "resnet");
        assert_eq!(config.demo_video_path(), PathBuf::from("./resnet_demo.gif"));

        config.run_name = Some("lung_r34".to_string());
        assert_eq!(config.metadata_path(), PathBuf::from("./lung_r34.json"));
    }

    #[test]
    fn test_input_size_follows_strategy() {
        let seg = RunConfig::default();
        assert_eq!(seg.input_size(), ImageDimensions::square(256));

        let cls = RunConfig {
            model: ModelKind::Densenet,
            ..Default::default()
        };
        assert_eq!(cls.input_size(), ImageDimensions::square(224));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RunConfig {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config { .. })));

        let mut config = RunConfig::default();
        config.video.fps = 0;
        assert!(config.validate().is_err());

        config.video.enabled = false;
        assert!(config.validate().is_ok());

        let config = RunConfig {
            epochs: 0,
            skip_training: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RunConfig = toml::from_str(
            r#"
            model = "resnet"
            resnet_depth = "r50"
            epochs = 5

            [video]
            fps = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.model, ModelKind::Resnet);
        assert_eq!(config.resnet_depth, ResNetDepth::R50);
        assert_eq!(config.epochs, 5);
        assert_eq!(config.video.fps, 4);
        assert_eq!(config.video.hold_frames, 2);
        assert_eq!(config.learning_rate, 1e-3);
    }
}
