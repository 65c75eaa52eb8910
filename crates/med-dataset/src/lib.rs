//! Dataset discovery, preprocessing and caching.
//!
//! This crate turns directories of medical images into sorted sample lists and
//! serves fixed-size binary tensors through a per-directory cache.

pub mod index;
pub mod loader;
pub mod preprocess;

pub use index::{list_images, paired_samples, ClassIndex, SampleEntry};
pub use loader::ImageLoader;
pub use preprocess::{otsu_threshold, resize_mask, to_binary_mask, Preprocessor, ProcessedImage};

pub mod prelude {
    pub use crate::index::*;
    pub use crate::loader::*;
    pub use crate::preprocess::*;
}
