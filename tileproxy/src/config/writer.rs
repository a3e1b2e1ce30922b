//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let worker_binary = config
        .warper
        .worker_binary
        .as_deref()
        .map(path_to_string)
        .unwrap_or_default();

    format!(
        r#"[store]
; Root directory of generated artifacts, laid out as <referenceFrame>/<group>/<id>/
root = {}

[warper]
; Number of raster warper worker processes
workers = {}
; Shared-memory arena per worker. Supports KB, MB, GB suffixes.
arena_size = {}
; Seconds before a request is abandoned and its worker respawned
timeout = {}
; Milliseconds workers get to exit on shutdown before being killed
shutdown_grace_ms = {}
; Path of the tileproxy-warper binary (empty = next to the running executable)
worker_binary = {}

[tiling]
; Samples per tile edge when deciding tile occupancy
tile_sampling = {}
; Sample the tiles of a LOD in parallel
parallel = {}
; Mark every ancestor of an occupied tile as occupied
force_watertight = {}

[logging]
directory = {}
file = {}
; error, warn, info, debug or trace (RUST_LOG overrides)
level = {}

[serving]
; Cache-Control max-age in seconds per file class
max_age_config = {}
max_age_support = {}
max_age_registry = {}
max_age_data = {}
"#,
        path_to_string(&config.store.root),
        config.warper.workers,
        format_size(config.warper.arena_size),
        config.warper.timeout_secs,
        config.warper.shutdown_grace_ms,
        worker_binary,
        config.tiling.tile_sampling,
        config.tiling.parallel,
        config.tiling.force_watertight,
        path_to_string(&config.logging.directory),
        config.logging.file,
        config.logging.level,
        config.serving.max_age_config,
        config.serving.max_age_support,
        config.serving.max_age_registry,
        config.serving.max_age_data,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
