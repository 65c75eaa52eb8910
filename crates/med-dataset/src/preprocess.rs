//! Deterministic preprocessing: resize, single-channel intensity, Otsu binarization.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{
    imageops::{self, FilterType},
    DynamicImage, GrayImage,
};
use med_core::{Error, ImageDimensions, PixelMap, Result, BACKGROUND, FOREGROUND};
use serde::{Deserialize, Serialize};

/// Bumped whenever [`Preprocessor::process`] changes its output for the same input.
pub const TRANSFORM_VERSION: u32 = 1;

/// A processed `[1, H, W]` binary map with values in {0.0, 1.0}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl ProcessedImage {
    /// Tensor shape `[channels, height, width]`
    pub fn shape(&self) -> [usize; 3] {
        [1, self.height as usize, self.width as usize]
    }

    pub fn dimensions(&self) -> ImageDimensions {
        ImageDimensions::new(self.width, self.height)
    }

    /// Converts to a `[1, H, W]` tensor on `device`
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(self.data.clone(), self.shape()), device)
    }

    /// Binary pixel map with 0/255 sentinels, for display and metrics
    pub fn to_pixel_map(&self) -> PixelMap {
        let data = self
            .data
            .iter()
            .map(|&v| if v >= 0.5 { FOREGROUND } else { BACKGROUND })
            .collect();
        PixelMap::new(self.width, self.height, data)
    }
}

/// Fixed-size preprocessing pipeline
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    target: ImageDimensions,
}

impl Preprocessor {
    pub fn new(target: ImageDimensions) -> Self {
        Self { target }
    }

    pub fn target(&self) -> ImageDimensions {
        self.target
    }

    /// Resizes to the target size, converts to luma and binarizes with Otsu's threshold.
    pub fn process(&self, image: &DynamicImage) -> Result<ProcessedImage> {
        let luma = self.resize_luma(image)?;
        let threshold = otsu_threshold(&luma);
        let data = luma
            .as_raw()
            .iter()
            .map(|&v| if v > threshold { 1.0 } else { 0.0 })
            .collect();

        Ok(ProcessedImage {
            width: luma.width(),
            height: luma.height(),
            data,
        })
    }

    /// Resized single-channel intensity image without thresholding
    pub fn resize_luma(&self, image: &DynamicImage) -> Result<GrayImage> {
        let ImageDimensions { width, height } = self.target;
        if width == 0 || height == 0 {
            return Err(Error::processing(
                "resize",
                format!("target size {} has a zero side", self.target),
            ));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::processing("resize", "source image is empty"));
        }

        let resized = if image.width() == width && image.height() == height {
            image.clone()
        } else {
            image.resize_exact(width, height, FilterType::Triangle)
        };
        Ok(resized.to_luma8())
    }
}

/// Global threshold maximizing between-class variance of the intensity histogram.
///
/// Pixels strictly above the returned value are foreground.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for &v in image.as_raw() {
        histogram[v as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &n)| i as f64 * n as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0.0f64;
    let mut best_variance = 0.0f64;
    let mut best_threshold = 0u8;

    for (t, &count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += t as f64 * count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight as f64;
        let diff = background_mean - foreground_mean;
        let variance = background_weight as f64 * foreground_weight as f64 * diff * diff;

        if variance > best_variance {
            best_variance = variance;
            best_threshold = t as u8;
        }
    }

    best_threshold
}

/// Normalizes any image to a single-channel 0/255 mask (≥128 is foreground).
pub fn to_binary_mask(image: &DynamicImage) -> PixelMap {
    let luma = image.to_luma8();
    let data = luma
        .as_raw()
        .iter()
        .map(|&v| if v >= 128 { FOREGROUND } else { BACKGROUND })
        .collect();
    PixelMap::new(luma.width(), luma.height(), data)
}

/// Nearest-neighbour resize of a binary mask; sentinel values are preserved.
pub fn resize_mask(mask: &PixelMap, width: u32, height: u32) -> PixelMap {
    if mask.width == width && mask.height == height {
        return mask.clone();
    }
    let background = || PixelMap::new(width, height, vec![BACKGROUND; (width * height) as usize]);
    if mask.is_empty() || width == 0 || height == 0 {
        return background();
    }

    match GrayImage::from_raw(mask.width, mask.height, mask.data.clone()) {
        Some(gray) => {
            let resized = imageops::resize(&gray, width, height, FilterType::Nearest);
            PixelMap::new(width, height, resized.into_raw())
        }
        None => background(),
    }
}
