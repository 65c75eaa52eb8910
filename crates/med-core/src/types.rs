//! Core type definitions shared by the dataset, training and tool crates.

use serde::{Deserialize, Serialize};

/// Which model and training strategy a run uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// U-Net pixel-wise segmentation
    #[default]
    Unet,
    /// DenseNet whole-image classification
    Densenet,
    /// ResNet whole-image classification
    Resnet,
}

impl ModelKind {
    /// Whether this kind trains with the segmentation strategy
    pub fn is_segmentation(&self) -> bool {
        matches!(self, ModelKind::Unet)
    }

    /// Default run name when none is configured
    pub fn default_name(&self) -> &'static str {
        match self {
            ModelKind::Unet => "unet",
            ModelKind::Densenet => "densenet",
            ModelKind::Resnet => "resnet",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.default_name())
    }
}

/// ResNet depth variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResNetDepth {
    #[default]
    R18,
    R34,
    R50,
    R101,
    R152,
}

impl ResNetDepth {
    /// Residual blocks per stage
    pub fn stage_blocks(&self) -> [usize; 4] {
        match self {
            ResNetDepth::R18 => [2, 2, 2, 2],
            ResNetDepth::R34 => [3, 4, 6, 3],
            ResNetDepth::R50 => [3, 4, 6, 3],
            ResNetDepth::R101 => [3, 4, 23, 3],
            ResNetDepth::R152 => [3, 8, 36, 3],
        }
    }

    /// Whether the variant uses bottleneck blocks instead of basic blocks
    pub fn uses_bottleneck(&self) -> bool {
        matches!(self, ResNetDepth::R50 | ResNetDepth::R101 | ResNetDepth::R152)
    }
}

impl std::fmt::Display for ResNetDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResNetDepth::R18 => write!(f, "ResNet-18"),
            ResNetDepth::R34 => write!(f, "ResNet-34"),
            ResNetDepth::R50 => write!(f, "ResNet-50"),
            ResNetDepth::R101 => write!(f, "ResNet-101"),
            ResNetDepth::R152 => write!(f, "ResNet-152"),
        }
    }
}

/// Image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    /// Number of pixels
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
