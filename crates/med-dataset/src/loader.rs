//! Image loading with a per-directory preprocessing cache.
//!
//! Every source image under `root` is processed into a fixed-size binary map.
//! The result is stored as `root/cache/<stem>.cache.json`. A cache record also
//! stores the source file name, transform version and target size it was
//! produced with. A record that does not match is recomputed and overwritten,
//! so `scan.png` and `scan.bmp` sharing a stem never serve each other's data.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use med_core::{Error, ImageDimensions, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::preprocess::{Preprocessor, ProcessedImage, TRANSFORM_VERSION};

/// Name of the cache subdirectory under a loader root
pub const CACHE_DIR: &str = "cache";
/// Extension of cache files
pub const CACHE_EXTENSION: &str = "cache.json";

/// On-disk cache record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    /// File name of the source image
    #[serde(default)]
    pub source: String,
    pub version: u32,
    pub target: ImageDimensions,
    pub image: ProcessedImage,
}

impl CacheRecord {
    fn matches(&self, source: &str, target: ImageDimensions) -> bool {
        self.source == source
            && self.version == TRANSFORM_VERSION
            && self.target == target
            && self.image.dimensions() == target
            && self.image.data.len() == target.pixels()
    }
}

/// Loads raw images from a root directory and caches their processed form
pub struct ImageLoader {
    root_dir: PathBuf,
    cache_dir: PathBuf,
    preprocessor: Preprocessor,
    raw_loads: Cell<usize>,
}

impl ImageLoader {
    /// Creates a loader rooted at `root_dir`, creating `root_dir/cache` if needed.
    pub fn new(root_dir: impl Into<PathBuf>, target: ImageDimensions) -> Result<Self> {
        let root_dir = root_dir.into();
        let cache_dir = root_dir.join(CACHE_DIR);
        fs::create_dir_all(&cache_dir).map_err(|e| Error::write(&cache_dir, e))?;

        Ok(Self {
            root_dir,
            cache_dir,
            preprocessor: Preprocessor::new(target),
            raw_loads: Cell::new(0),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn target(&self) -> ImageDimensions {
        self.preprocessor.target()
    }

    /// Number of raw image decodes performed so far
    pub fn raw_loads(&self) -> usize {
        self.raw_loads.get()
    }

    /// Gets the full path for an image
    pub fn full_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    /// Cache file backing `path`
    pub fn cache_path(&self, path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.cache_dir.join(format!("{stem}.{CACHE_EXTENSION}"))
    }

    fn source_name(path: &Path) -> String {
        path.file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Decodes the source image at `path` relative to the root.
    pub fn load_raw(&self, path: impl AsRef<Path>) -> Result<DynamicImage> {
        let full_path = self.full_path(path.as_ref());
        self.raw_loads.set(self.raw_loads.get() + 1);

        if !full_path.is_file() {
            return Err(Error::read(&full_path, "image file not found"));
        }

        image::ImageReader::open(&full_path)
            .map_err(|e| Error::read(&full_path, e))?
            .with_guessed_format()
            .map_err(|e| Error::read(&full_path, e))?
            .decode()
            .map_err(|e| Error::read(&full_path, e))
    }

    /// Applies the loader's preprocessing to an already decoded image.
    pub fn process(&self, image: &DynamicImage) -> Result<ProcessedImage> {
        self.preprocessor.process(image)
    }

    /// Returns the processed image, from the cache when a matching entry exists.
    pub fn load_cached(&self, path: impl AsRef<Path>) -> Result<ProcessedImage> {
        let path = path.as_ref();
        let cache_path = self.cache_path(path);

        if let Some(image) = self.read_cache(&cache_path, &Self::source_name(path)) {
            return Ok(image);
        }

        let raw = self.load_raw(path)?;
        let processed = self.process(&raw)?;
        self.cache(path, &processed)?;
        Ok(processed)
    }

    /// Persists `image` as the cache entry for `path`.
    pub fn cache(&self, path: impl AsRef<Path>, image: &ProcessedImage) -> Result<()> {
        let path = path.as_ref();
        let cache_path = self.cache_path(path);
        let record = CacheRecord {
            source: Self::source_name(path),
            version: TRANSFORM_VERSION,
            target: self.target(),
            image: image.clone(),
        };
        let json = serde_json::to_string(&record)?;
        fs::write(&cache_path, json).map_err(|e| Error::write(&cache_path, e))
    }

    fn read_cache(&self, cache_path: &Path, source: &str) -> Option<ProcessedImage> {
        let content = fs::read_to_string(cache_path).ok()?;
        match serde_json::from_str::<CacheRecord>(&content) {
            Ok(record) if record.matches(source, self.target()) => Some(record.image),
            Ok(record) => {
                debug!(
                    "Stale cache entry {} ({:?}, v{}, {}); recomputing",
                    cache_path.display(),
                    record.source,
                    record.version,
                    record.target
                );
                None
            }
            Err(e) => {
                debug!("Unreadable cache entry {}: {e}; recomputing", cache_path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(path: &Path) {
        let img = ImageBuffer::from_fn(20, 10, |x, y| {
            if (x + y) % 3 == 0 {
                Rgb([240u8, 240u8, 240u8])
            } else {
                Rgb([10u8, 30u8, 10u8])
            }
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_new_creates_cache_dir() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(dir.path(), ImageDimensions::square(8)).unwrap();
        assert!(loader.cache_dir().is_dir());
        assert_eq!(loader.cache_dir(), dir.path().join("cache"));
    }

    #[test]
    fn test_cache_path_uses_stem() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(dir.path(), ImageDimensions::square(8)).unwrap();
        let path = loader.cache_path(Path::new("case_01.png"));
        assert!(path.ends_with("cache/case_01.cache.json"));
    }

    #[test]
    fn test_load_cached_is_idempotent_without_raw_reload() {
        let dir = TempDir::new().unwrap();
        create_test_image(&dir.path().join("scan.png"));
        let loader = ImageLoader::new(dir.path(), ImageDimensions::square(8)).unwrap();

        let first = loader.load_cached("scan.png").unwrap();
        assert_eq!(loader.raw_loads(), 1);
        assert!(loader.cache_path(Path::new("scan.png")).is_file());

        let second = loader.load_cached("scan.png").unwrap();
        assert_eq!(loader.raw_loads(), 1);
        assert_eq!(first, second);
        assert_eq!(
            first.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            second.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_cache_hit_matches_recomputation() {
        let dir = TempDir::new().unwrap();
        create_test_image(&dir.path().join("scan.png"));
        let loader = ImageLoader::new(dir.path(), ImageDimensions::new(12, 6)).unwrap();

        let cached = loader.load_cached("scan.png").unwrap();
        let raw = loader.load_raw("scan.png").unwrap();
        assert_eq!(cached, loader.process(&raw).unwrap());
    }

    #[test]
    fn test_changed_target_size_recomputes() {
        let dir = TempDir::new().unwrap();
        create_test_image(&dir.path().join("scan.png"));

        let small = ImageLoader::new(dir.path(), ImageDimensions::square(4)).unwrap();
        small.load_cached("scan.png").unwrap();

        let large = ImageLoader::new(dir.path(), ImageDimensions::square(8)).unwrap();
        let image = large.load_cached("scan.png").unwrap();
        assert_eq!(large.raw_loads(), 1);
        assert_eq!(image.shape(), [1, 8, 8]);
    }

    #[test]
    fn test_same_stem_sources_do_not_share_entries() {
        let dir = TempDir::new().unwrap();
        create_test_image(&dir.path().join("scan.png"));
        ImageBuffer::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgb([250u8, 250u8, 250u8])
            } else {
                Rgb([5u8, 5u8, 5u8])
            }
        })
        .save(dir.path().join("scan.bmp"))
        .unwrap();
        let loader = ImageLoader::new(dir.path(), ImageDimensions::square(8)).unwrap();

        let png = loader.load_cached("scan.png").unwrap();
        let bmp = loader.load_cached("scan.bmp").unwrap();
        assert_eq!(loader.raw_loads(), 2);
        assert_ne!(png, bmp);

        let raw = loader.load_raw("scan.bmp").unwrap();
        assert_eq!(bmp, loader.process(&raw).unwrap());
        assert_eq!(loader.load_cached("scan.png").unwrap(), png);
    }

    #[test]
    fn test_corrupt_cache_entry_recomputes() {
        let dir = TempDir::new().unwrap();
        create_test_image(&dir.path().join("scan.png"));
        let loader = ImageLoader::new(dir.path(), ImageDimensions::square(4)).unwrap();
        fs::write(loader.cache_path(Path::new("scan.png")), "not json").unwrap();

        let image = loader.load_cached("scan.png").unwrap();
        assert_eq!(loader.raw_loads(), 1);
        assert_eq!(image.data.len(), 16);
    }

    #[test]
    fn test_explicit_cache_is_served() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(dir.path(), ImageDimensions::new(2, 1)).unwrap();
        let image = ProcessedImage {
            width: 2,
            height: 1,
            data: vec![1.0, 0.0],
        };
        loader.cache("virtual.png", &image).unwrap();

        // no source file exists, so this can only come from the cache
        assert_eq!(loader.load_cached("virtual.png").unwrap(), image);
        assert_eq!(loader.raw_loads(), 0);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(dir.path(), ImageDimensions::square(4)).unwrap();
        let err = loader.load_cached("absent.png").unwrap_err();
        assert!(matches!(
            err,
            Error::FileIo {
                access: med_core::Access::Read,
                ..
            }
        ));
    }

    #[test]
    fn test_corrupt_image_is_read_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.png"), b"definitely not a png").unwrap();
        let loader = ImageLoader::new(dir.path(), ImageDimensions::square(4)).unwrap();
        assert!(matches!(
            loader.load_raw("broken.png"),
            Err(Error::FileIo { .. })
        ));
        assert!(!loader.cache_path(Path::new("broken.png")).exists());
    }
}
