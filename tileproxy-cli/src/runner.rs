//! Shared setup for commands: configuration, logging, warper and generators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tileproxy::config::ConfigFile;
use tileproxy::generator::{Arsenal, FactoryRegistry, Generators, GeneratorsConfig};
use tileproxy::logging::{init_logging, LoggingGuard};
use tileproxy::resource::load_resources;
use tileproxy::tiling::ReferenceFrames;
use tileproxy::warper::{GdalWarper, InProcessWarper, RasterWarper};
use tracing::info;

use crate::error::CliError;

/// Warper backing a command run.
pub enum WarperHandle {
    Pool(GdalWarper),
    InProcess(Arc<InProcessWarper>),
}

impl WarperHandle {
    pub fn as_raster_warper(&self) -> Arc<dyn RasterWarper> {
        match self {
            WarperHandle::Pool(pool) => Arc::new(pool.clone()),
            WarperHandle::InProcess(warper) => warper.clone(),
        }
    }

    /// Stops pool workers; in-process warping needs no teardown.
    pub fn shutdown(&self) {
        if let WarperHandle::Pool(pool) = self {
            pool.shutdown();
        }
    }
}

/// Command context holding the loaded configuration and the logging guard.
pub struct CliRunner {
    config: ConfigFile,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Loads the configuration and starts logging.
    ///
    /// `log_level` overrides the configured default level.
    pub fn new(config_path: Option<&Path>, log_level: Option<&str>) -> Result<Self, CliError> {
        let mut config = match config_path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };
        if let Some(level) = log_level {
            config.logging.level = level.to_string();
        }

        let logging = init_logging(
            &config.logging.directory,
            &config.logging.file,
            &config.logging.level,
        )
        .map_err(|e| CliError::Config(format!("Failed to initialize logging: {}", e)))?;

        Ok(Self {
            config,
            _logging: logging,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = tileproxy::VERSION,
            command,
            store = %self.config.store.root.display(),
            workers = self.config.warper.workers,
            "tileproxy starting"
        );
    }

    /// Starts the warper pool, or an in-process warper when debugging.
    pub fn warper(&self, in_process: bool) -> Result<WarperHandle, CliError> {
        if in_process {
            let warper = InProcessWarper::new(self.config.warper.arena_size)
                .map_err(CliError::Warper)?;
            return Ok(WarperHandle::InProcess(Arc::new(warper)));
        }
        let pool = GdalWarper::spawn(self.config.warper_config()).map_err(CliError::Warper)?;
        Ok(WarperHandle::Pool(pool))
    }

    /// Builds generators for the resources listed in `resources`.
    ///
    /// Data paths in definitions resolve against `data_root`, or the
    /// directory of the resources file when not given.
    pub fn generators(
        &self,
        resources: &Path,
        data_root: Option<PathBuf>,
        warper: &WarperHandle,
    ) -> Result<Generators, CliError> {
        let data_root = data_root.unwrap_or_else(|| {
            resources
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });
        let arsenal = Arsenal::new(warper.as_raster_warper(), self.config.tiling_config());
        let generators = Generators::new(
            GeneratorsConfig::new(self.config.store.root.clone(), data_root),
            FactoryRegistry::builtin(),
            ReferenceFrames::builtin(),
            arsenal,
        );

        let report = generators.load(load_resources(resources).map_err(CliError::Resources)?);
        for (id, reason) in &report.rejected {
            eprintln!("Rejected {}: {}", id, reason);
        }
        Ok(generators)
    }
}

/// Installs a Ctrl-C handler; the returned flag is set once it fires.
///
/// The warper is shut down from the handler so that blocked requests return.
pub fn install_shutdown_handler(warper: &WarperHandle) -> Result<Arc<AtomicBool>, CliError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let pool = match warper {
        WarperHandle::Pool(pool) => Some(pool.clone()),
        WarperHandle::InProcess(_) => None,
    };

    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received shutdown signal, stopping...");
        flag.store(true, Ordering::SeqCst);
        if let Some(pool) = &pool {
            pool.shutdown();
        }
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    Ok(shutdown)
}
