//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.

use std::path::PathBuf;
use std::time::Duration;

use crate::generator::FileClass;
use crate::tiling::TilingConfig;
use crate::warper::WarperConfig;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub store: StoreSettings,
    pub warper: WarperSettings,
    pub tiling: TilingSettings,
    pub logging: LoggingSettings,
    pub serving: ServingSettings,
}

/// Where generated artifacts are kept.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Root of `<referenceFrame>/<group>/<id>/` resource directories
    pub root: PathBuf,
}

/// Raster warper pool.
#[derive(Debug, Clone)]
pub struct WarperSettings {
    /// Number of worker processes
    pub workers: usize,
    /// Shared arena size per worker in bytes
    pub arena_size: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Time given to workers to exit on shutdown before they are killed
    pub shutdown_grace_ms: u64,
    /// Explicit path of the `tileproxy-warper` binary
    pub worker_binary: Option<PathBuf>,
}

/// Tile index generation.
#[derive(Debug, Clone)]
pub struct TilingSettings {
    pub tile_sampling: u32,
    pub parallel: bool,
    pub force_watertight: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
    /// Default level when `RUST_LOG` is not set
    pub level: String,
}

/// Cache-Control max-age per file class, in seconds.
#[derive(Debug, Clone)]
pub struct ServingSettings {
    pub max_age_config: u64,
    pub max_age_support: u64,
    pub max_age_registry: u64,
    pub max_age_data: u64,
}

impl ServingSettings {
    /// Max-age for a file class; unknown files are not cached.
    pub fn max_age(&self, class: FileClass) -> u64 {
        match class {
            FileClass::Config => self.max_age_config,
            FileClass::Support => self.max_age_support,
            FileClass::Registry => self.max_age_registry,
            FileClass::Data => self.max_age_data,
            FileClass::Unknown => 0,
        }
    }
}

impl ConfigFile {
    /// Runtime configuration of the warper pool.
    pub fn warper_config(&self) -> WarperConfig {
        let mut config = WarperConfig::default()
            .with_workers(self.warper.workers)
            .with_arena_size(self.warper.arena_size)
            .with_timeout(Duration::from_secs(self.warper.timeout_secs))
            .with_shutdown_grace(Duration::from_millis(self.warper.shutdown_grace_ms))
            .with_log_level(&self.logging.level);
        if let Some(binary) = &self.warper.worker_binary {
            config = config.with_worker_binary(binary.clone());
        }
        config
    }

    /// Runtime configuration of tile index generation.
    pub fn tiling_config(&self) -> TilingConfig {
        TilingConfig::default()
            .with_tile_sampling(self.tiling.tile_sampling)
            .with_parallel(self.tiling.parallel)
            .with_force_watertight(self.tiling.force_watertight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_age_per_class() {
        let serving = ConfigFile::default().serving;
        assert_eq!(serving.max_age(FileClass::Config), 60);
        assert_eq!(serving.max_age(FileClass::Data), 604_800);
        assert_eq!(serving.max_age(FileClass::Unknown), 0);
    }

    #[test]
    fn test_runtime_configs_follow_file() {
        let mut config = ConfigFile::default();
        config.warper.workers = 3;
        config.warper.timeout_secs = 5;
        config.tiling.force_watertight = true;

        let warper = config.warper_config();
        assert_eq!(warper.workers, 3);
        assert_eq!(warper.timeout, Duration::from_secs(5));
        assert!(config.tiling_config().force_watertight);
    }
}
