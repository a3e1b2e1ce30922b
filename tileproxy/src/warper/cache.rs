//! Per-worker cache of opened datasets.
//!
//! A cache belongs to exactly one worker and is only used from the worker's
//! request loop, so it carries no locking. Entries live until the worker
//! exits; recycling the worker is the eviction mechanism.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::geo::GeoDataset;

#[derive(Default)]
pub struct DatasetCache {
    datasets: HashMap<PathBuf, GeoDataset>,
    masks: HashMap<PathBuf, GeoDataset>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the data dataset at `path`, opening it on first use.
    pub fn dataset(&mut self, path: &Path) -> Result<&GeoDataset> {
        if !self.datasets.contains_key(path) {
            debug!(path = %path.display(), "Opening dataset");
            let ds = GeoDataset::open(path)?;
            self.datasets.insert(path.to_path_buf(), ds);
        }
        Ok(&self.datasets[path])
    }

    /// Returns the mask dataset at `path`, opening it on first use.
    pub fn mask(&mut self, path: &Path) -> Result<&GeoDataset> {
        if !self.masks.contains_key(path) {
            debug!(path = %path.display(), "Opening mask dataset");
            let ds = GeoDataset::open_mask(path)?;
            self.masks.insert(path.to_path_buf(), ds);
        }
        Ok(&self.masks[path])
    }

    /// Number of open datasets (data and mask).
    pub fn len(&self) -> usize {
        self.datasets.len() + self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Extents2, GeoReference, SrsDefinition};
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    fn write_dataset(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        GrayImage::from_pixel(4, 4, Luma([200])).save(&path).unwrap();
        GeoReference::new(SrsDefinition::epsg(3857), Extents2::new(0.0, 0.0, 4.0, 4.0))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_opens_lazily_and_reuses() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(dir.path(), "a.png");
        let mut cache = DatasetCache::new();
        assert!(cache.is_empty());

        cache.dataset(&path).unwrap();
        // deleting the file does not matter once cached
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cache.dataset(&path).unwrap().size().width, 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mask_and_dataset_are_separate_entries() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(dir.path(), "b.png");
        let mut cache = DatasetCache::new();

        let data = cache.dataset(&path).unwrap().data()[0];
        let coverage = cache.mask(&path).unwrap().data()[0];
        assert_eq!(data, 200.0);
        assert!((coverage - 200.0 / 255.0).abs() < 1e-9);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_missing_dataset_not_cached() {
        let dir = TempDir::new().unwrap();
        let mut cache = DatasetCache::new();
        assert!(cache.dataset(&dir.path().join("nope.png")).unwrap_err().is_not_found());
        assert!(cache.is_empty());
    }
}
