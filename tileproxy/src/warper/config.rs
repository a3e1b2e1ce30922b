//! Warper pool configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::defaults::{
    default_warper_workers, DEFAULT_ARENA_SIZE, DEFAULT_LOG_LEVEL, DEFAULT_SHUTDOWN_GRACE_MS,
    DEFAULT_WARPER_TIMEOUT_SECS,
};

/// Name of the worker executable.
pub const WORKER_BINARY_NAME: &str = "tileproxy-warper";

/// Configuration for [`super::GdalWarper`].
#[derive(Debug, Clone)]
pub struct WarperConfig {
    /// Number of worker processes.
    pub workers: usize,
    /// Shared arena capacity per worker, in bytes.
    pub arena_size: usize,
    /// How long a request may take before its worker is killed.
    pub timeout: Duration,
    /// How long a freshly spawned worker may take to report ready.
    pub spawn_timeout: Duration,
    /// Grace period between the shutdown message and killing a worker.
    pub shutdown_grace: Duration,
    /// Explicit worker binary; resolved next to the current executable when unset.
    pub worker_binary: Option<PathBuf>,
    /// Directory holding the arena files.
    pub arena_dir: PathBuf,
    /// Default log level passed to workers.
    pub log_level: String,
}

impl Default for WarperConfig {
    fn default() -> Self {
        Self {
            workers: default_warper_workers(),
            arena_size: DEFAULT_ARENA_SIZE,
            timeout: Duration::from_secs(DEFAULT_WARPER_TIMEOUT_SECS),
            spawn_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            worker_binary: None,
            arena_dir: default_arena_dir(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl WarperConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = arena_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_worker_binary(mut self, path: PathBuf) -> Self {
        self.worker_binary = Some(path);
        self
    }

    pub fn with_arena_dir(mut self, dir: PathBuf) -> Self {
        self.arena_dir = dir;
        self
    }

    pub fn with_log_level(mut self, level: &str) -> Self {
        self.log_level = level.to_string();
        self
    }

    /// Resolves the worker binary path.
    ///
    /// Without an explicit path the binary is looked up next to the current
    /// executable and one directory above it (test executables live in
    /// `target/<profile>/deps`).
    pub fn resolve_worker_binary(&self) -> std::io::Result<PathBuf> {
        if let Some(path) = &self.worker_binary {
            return Ok(path.clone());
        }

        let exe = std::env::current_exe()?;
        let name = format!("{}{}", WORKER_BINARY_NAME, std::env::consts::EXE_SUFFIX);
        let candidates = exe
            .ancestors()
            .skip(1)
            .take(2)
            .map(|dir| dir.join(&name))
            .collect::<Vec<_>>();

        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found next to {}", name, exe.display()),
                )
            })
    }
}

/// Prefers a RAM-backed directory for arena files when one exists.
fn default_arena_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = WarperConfig::default()
            .with_workers(0)
            .with_arena_size(1024)
            .with_timeout(Duration::from_millis(250))
            .with_worker_binary(PathBuf::from("/bin/worker"));

        assert_eq!(config.workers, 1);
        assert_eq!(config.arena_size, 1024);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(
            config.resolve_worker_binary().unwrap(),
            PathBuf::from("/bin/worker")
        );
    }

    #[test]
    fn test_default_arena_dir_exists() {
        assert!(WarperConfig::default().arena_dir.is_dir());
    }
}
