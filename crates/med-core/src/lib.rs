//! Core types and utilities for medical image training runs.
//!
//! This crate provides the error kinds, run configuration, metrics engine and
//! CLI helpers shared by the dataset, training and tool crates.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod types;

pub use backend::*;
pub use cli::*;
pub use config::*;
pub use error::{Access, Error, Result};
pub use metrics::*;
pub use progress::ProgressReporter;
pub use types::*;

pub mod prelude {
    pub use crate::config::{RunConfig, VideoConfig};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::{ConfusionCounts, MetricAccumulator, PixelMap, SegmentationScores};
    pub use crate::types::*;
}
