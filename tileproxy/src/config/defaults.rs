//! Default values for all configuration settings.

use std::path::PathBuf;

use super::settings::*;

/// Number of warper worker processes: half the cores, at least 1.
pub fn default_warper_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(2)
}

/// Default store root (`~/.tileproxy/store`).
pub fn default_store_root() -> PathBuf {
    super::config_directory().join("store")
}

/// Default shared arena size per warper worker (64 MB).
pub const DEFAULT_ARENA_SIZE: usize = 64 * 1024 * 1024;

/// Default timeout of a single warper request in seconds.
pub const DEFAULT_WARPER_TIMEOUT_SECS: u64 = 60;

/// Default grace period for workers to exit on shutdown, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

/// Default number of samples per tile edge when computing tile occupancy.
pub const DEFAULT_TILE_SAMPLING: u32 = 128;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Max-age (seconds) for configuration documents such as `mapConfig.json`.
pub const DEFAULT_MAX_AGE_CONFIG: u64 = 60;

/// Max-age (seconds) for static support files.
pub const DEFAULT_MAX_AGE_SUPPORT: u64 = 3600;

/// Max-age (seconds) for registry passthrough files.
pub const DEFAULT_MAX_AGE_REGISTRY: u64 = 3600;

/// Max-age (seconds) for generated data (tiles, metatiles, geodata).
pub const DEFAULT_MAX_AGE_DATA: u64 = 604_800;

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                root: default_store_root(),
            },
            warper: WarperSettings {
                workers: default_warper_workers(),
                arena_size: DEFAULT_ARENA_SIZE,
                timeout_secs: DEFAULT_WARPER_TIMEOUT_SECS,
                shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
                worker_binary: None,
            },
            tiling: TilingSettings {
                tile_sampling: DEFAULT_TILE_SAMPLING,
                parallel: true,
                force_watertight: false,
            },
            logging: LoggingSettings {
                directory: PathBuf::from(crate::logging::default_log_dir()),
                file: crate::logging::default_log_file().to_string(),
                level: DEFAULT_LOG_LEVEL.to_string(),
            },
            serving: ServingSettings {
                max_age_config: DEFAULT_MAX_AGE_CONFIG,
                max_age_support: DEFAULT_MAX_AGE_SUPPORT,
                max_age_registry: DEFAULT_MAX_AGE_REGISTRY,
                max_age_data: DEFAULT_MAX_AGE_DATA,
            },
        }
    }
}
