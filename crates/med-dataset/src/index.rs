//! Sample discovery for segmentation and classification datasets.
//!
//! Segmentation roots contain `image/` and `mask/` folders with same-named
//! files. Classification roots contain one folder per class:
//!
//! ```text
//! train/
//! ├── benign/
//! │   ├── 0001.png
//! │   └── 0002.png
//! └── malignant/
//!     └── 0003.png
//! ```
//!
//! Every list is sorted so repeated runs over the same tree see the same order.

use std::path::{Path, PathBuf};

use med_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions treated as images
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff"];

/// One sample: a file relative to its dataset root and an optional class label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleEntry {
    pub file: PathBuf,
    pub label: Option<usize>,
}

impl SampleEntry {
    pub fn unlabeled(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            label: None,
        }
    }

    pub fn labeled(file: impl Into<PathBuf>, label: usize) -> Self {
        Self {
            file: file.into(),
            label: Some(label),
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Sorted file names of the images directly inside `dir`.
pub fn list_images(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(Error::read(dir, "directory not found"));
    }

    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image(e.path()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

/// Images in `image_dir` that have a same-named file in `mask_dir`.
///
/// Images without a mask are logged and left out.
pub fn paired_samples(image_dir: &Path, mask_dir: &Path) -> Result<Vec<SampleEntry>> {
    let mut samples = Vec::new();
    for name in list_images(image_dir)? {
        if mask_dir.join(&name).is_file() {
            samples.push(SampleEntry::unlabeled(name));
        } else {
            warn!("Mask not found for {name}; skipping");
        }
    }
    Ok(samples)
}

/// Sorted class names and their contiguous indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassIndex {
    classes: Vec<String>,
}

impl ClassIndex {
    /// Builds the index from already known class names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = names.into_iter().map(Into::into).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Uses the immediate subdirectories of `root` as classes.
    pub fn discover(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::read(root, "train directory not found"));
        }

        let names = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != crate::loader::CACHE_DIR);

        let index = Self::from_names(names);
        if index.is_empty() {
            return Err(Error::read(root, "no class subdirectories found"));
        }
        debug!("Discovered {} classes: {:?}", index.len(), index.classes);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.classes
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(name)).ok()
    }

    /// Flattened `(class/file, label)` list over every class folder under `root`.
    ///
    /// A class without a folder under `root` is logged and contributes nothing.
    pub fn samples(&self, root: &Path) -> Result<Vec<SampleEntry>> {
        let mut samples = Vec::new();
        for (label, class) in self.classes.iter().enumerate() {
            let class_dir = root.join(class);
            if !class_dir.is_dir() {
                warn!("Class folder missing: {}", class_dir.display());
                continue;
            }
            for name in list_images(&class_dir)? {
                samples.push(SampleEntry::labeled(Path::new(class).join(name), label));
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_list_images_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["b.png", "a.JPG", "notes.txt", "c.tif"] {
            touch(&dir.path().join(name));
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let names = list_images(dir.path()).unwrap();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.tif"]);
    }

    #[test]
    fn test_list_images_missing_dir() {
        assert!(matches!(
            list_images(Path::new("/nonexistent/images")),
            Err(Error::FileIo { .. })
        ));
    }

    #[test]
    fn test_paired_samples_skip_missing_masks() {
        let dir = TempDir::new().unwrap();
        for name in ["c.png", "a.png", "b.png"] {
            touch(&dir.path().join("image").join(name));
        }
        for name in ["a.png", "c.png"] {
            touch(&dir.path().join("mask").join(name));
        }

        let samples =
            paired_samples(&dir.path().join("image"), &dir.path().join("mask")).unwrap();
        let files: Vec<_> = samples.iter().map(|s| s.file.clone()).collect();
        assert_eq!(files, vec![PathBuf::from("a.png"), PathBuf::from("c.png")]);
        assert!(samples.iter().all(|s| s.label.is_none()));
    }

    #[test]
    fn test_class_order_is_sorted_not_discovery_order() {
        let index = ClassIndex::from_names(["b", "a", "c"]);
        assert_eq!(index.names(), &["a", "b", "c"]);
        assert_eq!(index.index_of("a"), Some(0));
        assert_eq!(index.index_of("b"), Some(1));
        assert_eq!(index.index_of("c"), Some(2));
        assert_eq!(index.index_of("d"), None);
        assert_eq!(index.name(2), Some("c"));
    }

    #[test]
    fn test_discover_sorts_subdirectories() {
        let dir = TempDir::new().unwrap();
        for class in ["b", "a", "c"] {
            fs::create_dir(dir.path().join(class)).unwrap();
        }
        touch(&dir.path().join("stray.png"));

        let index = ClassIndex::discover(dir.path()).unwrap();
        assert_eq!(index.names(), &["a", "b", "c"]);
    }

    #[test]
    fn test_discover_without_classes_fails() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("only_file.png"));
        let err = ClassIndex::discover(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no class subdirectories"));
    }

    #[test]
    fn test_flattened_samples_match_class_counts() {
        let dir = TempDir::new().unwrap();
        let counts = [("gamma", 1usize), ("alpha", 3), ("beta", 2)];
        for (class, n) in counts {
            for i in 0..n {
                touch(&dir.path().join(class).join(format!("{i:03}.png")));
            }
        }

        let index = ClassIndex::discover(dir.path()).unwrap();
        let samples = index.samples(dir.path()).unwrap();
        assert_eq!(samples.len(), counts.iter().map(|(_, n)| n).sum::<usize>());

        for sample in &samples {
            let class = sample.file.parent().unwrap().to_string_lossy().into_owned();
            assert_eq!(sample.label, index.index_of(&class));
        }
        assert_eq!(samples[0].file, PathBuf::from("alpha/000.png"));
        assert_eq!(samples[5].label, Some(2));
    }

    #[test]
    fn test_samples_skip_missing_class_folder() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a").join("x.png"));

        let index = ClassIndex::from_names(["a", "b"]);
        let samples = index.samples(dir.path()).unwrap();
        assert_eq!(samples, vec![SampleEntry::labeled("a/x.png", 0)]);
    }
}
