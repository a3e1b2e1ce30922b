//! Generators: per-resource producers of tiles, metatiles and geodata.
//!
//! Every configured resource is bound to one [`Generator`], which wraps the
//! driver-specific [`GeneratorDriver`] in an explicit lifecycle (see
//! [`GeneratorState`]). [`Generators`] owns all of them, applies
//! redefinitions and resolves dependencies between resources.
//!
//! A ready generator answers file requests either immediately (config and
//! definition documents, support files) or with a deferred [`Task`] that
//! runs against the shared [`Arsenal`] and writes to a [`Sink`].
//!
//! Built-in drivers:
//!
//! | driver                   | type    | artifacts                                 |
//! |--------------------------|---------|-------------------------------------------|
//! | `tms-raster`             | tms     | `tileset.index`, `delivery.index`         |
//! | `tms-raster-synthetic`   | tms     | none                                      |
//! | `surface-meta`           | surface | none                                      |
//! | `geodata-mesh`           | geodata | `geodata`                                 |
//! | `geodata-semantic-tiled` | geodata | `tileset.index`, `delivery.index`         |

mod arsenal;
mod file_info;
mod geodata;
mod geodata_mesh;
mod generators;
mod lifecycle;
mod map_config;
pub mod metadata;
mod obj;
mod registry;
mod semantic;
mod semantic_tiled;
mod sink;
mod support;
mod surface_meta;
mod tiled;
mod tms_raster;
mod tms_synthetic;

pub use arsenal::Arsenal;
pub use file_info::{definition_file, FileInfo, FileKind};
pub use generators::{Generators, GeneratorsConfig, LoadReport};
pub use lifecycle::{run_task, Generator, GeneratorState, RESOURCE_FILE};
pub use registry::{Factory, FactoryRegistry};
pub use semantic::{SemanticEntity, SemanticTile, SemanticTileRequest, SemanticWorld};
pub use semantic_tiled::precomputed_tiling;
pub use sink::{FileClass, MemorySink, Sink, SinkFileInfo, SinkResponse};
pub use support::{StyleSource, SupportFile};
pub use tiled::TILE_SIZE;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::resource::Resource;
use crate::tiling::ReferenceFrame;

/// Deferred work producing a file.
pub type Task = Box<dyn FnOnce(&mut dyn Sink, &Arsenal) -> Result<()> + Send>;

/// Everything a driver is constructed from.
#[derive(Debug, Clone)]
pub struct GeneratorParams {
    pub resource: Resource,
    pub reference_frame: ReferenceFrame,
    /// Directory holding this resource's artifacts.
    pub root: PathBuf,
    /// Base for relative dataset paths in definitions.
    pub data_root: PathBuf,
    /// Previous definition differs in a way that invalidates the artifacts.
    pub change_enforced: bool,
    /// Directory served under `registry/`, if any.
    pub registry_root: Option<PathBuf>,
}

impl GeneratorParams {
    /// Resolves a dataset path from a definition.
    pub fn absolute_dataset(&self, path: &str) -> PathBuf {
        self.data_root.join(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Driver-specific part of a generator.
pub trait GeneratorDriver: Send + Sync {
    /// Restores prepared output from disk.
    ///
    /// Returns `Ok(true)` when the persisted metadata matches the artifacts
    /// and the generator can go straight to `Ready`.
    fn load_prepared(&self) -> Result<bool>;

    /// Builds the artifacts. Must write through temporary names and rename
    /// into place so readers never see a torn artifact.
    fn prepare(&self, arsenal: &Arsenal) -> Result<()>;

    /// Answers a file request of a ready generator.
    ///
    /// Immediate answers are written to `sink` and `Ok(None)` returned;
    /// deferred ones come back as a [`Task`].
    fn generate_file(&self, file: &FileInfo, sink: &mut dyn Sink) -> Result<Option<Task>>;
}
