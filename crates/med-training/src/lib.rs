//! Training infrastructure for medical image segmentation and classification.
//!
//! This crate provides:
//! - Model architectures (U-Net, ResNet-18 to 152, DenseNet)
//! - Segmentation and classification trainers sharing one session lifecycle
//! - Losses, weight checkpoints and run metadata
//! - The demo video compositor written during evaluation

pub mod checkpoint;
pub mod classification;
pub mod font;
pub mod loss;
pub mod model;
pub mod segmentation;
pub mod trainer;
pub mod visualizer;

pub use checkpoint::{load_model, save_model, RunMetadata};
pub use classification::ClassificationTrainer;
pub use model::{ClassificationModel, ClassifierNet, SegmentationModel, UNet, UNetConfig};
pub use segmentation::SegmentationTrainer;
pub use trainer::{
    ClassificationReport, EvaluationReport, SegmentationReport, SessionState, TrainSummary,
    Trainer,
};
pub use visualizer::{DemoWriter, FrameLayout};

pub mod prelude {
    pub use crate::checkpoint::{load_model, save_model, RunMetadata};
    pub use crate::classification::ClassificationTrainer;
    pub use crate::model::*;
    pub use crate::segmentation::SegmentationTrainer;
    pub use crate::trainer::*;
}
