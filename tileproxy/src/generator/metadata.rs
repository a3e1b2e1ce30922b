//! Metadata persisted next to generated artifacts.
//!
//! A generator writes its artifact first and `metadata.json` last. On
//! restart the stored file size is compared with the artifact on disk: a
//! match means the previous `prepare` completed and its output can be
//! served without running it again.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::tiling::{LodRange, TileRange};

/// File name of the metadata record in a resource root.
pub const METADATA_FILE: &str = "metadata.json";

/// Loads a metadata record.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!(path = %path.display(), "Loading metadata");
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::internal(format!("Malformed metadata {}: {}", path.display(), e)))
}

/// Saves a metadata record through a temporary file and a rename.
pub fn save<T: Serialize>(path: &Path, metadata: &T) -> Result<()> {
    debug!(path = %path.display(), "Saving metadata");
    let content = serde_json::to_string_pretty(metadata)
        .map_err(|e| Error::internal(format!("Cannot serialize metadata: {}", e)))?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Returns true if the artifact exists and has the recorded size.
pub fn artifact_matches(artifact: &Path, file_size: u64) -> bool {
    match fs::metadata(artifact) {
        Ok(meta) if meta.len() == file_size => true,
        Ok(meta) => {
            debug!(
                path = %artifact.display(),
                expected = file_size,
                actual = meta.len(),
                "Sizes differ, regenerate"
            );
            false
        }
        Err(_) => false,
    }
}

/// Metadata of the tiled generators: the delivery index and derived ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiledMetadata {
    /// Size of `delivery.index`.
    pub file_size: u64,
    pub lod_range: LodRange,
    pub tile_range: TileRange,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_and_size_check() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("delivery.index");
        fs::write(&artifact, [0u8; 10]).unwrap();

        let meta = TiledMetadata {
            file_size: 10,
            lod_range: LodRange::new(1, 5),
            tile_range: TileRange::new(0, 0, 1, 1),
        };
        let path = dir.path().join(METADATA_FILE);
        save(&path, &meta).unwrap();

        let loaded: TiledMetadata = load(&path).unwrap();
        assert_eq!(loaded, meta);
        assert!(artifact_matches(&artifact, loaded.file_size));
        assert!(!artifact_matches(&artifact, 11));
        assert!(!artifact_matches(&dir.path().join("missing"), 10));
    }

    #[test]
    fn test_corrupt_metadata_is_internal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(load::<TiledMetadata>(&path).unwrap_err().is_internal());
    }
}
