//! CLI error type.

use std::fmt;
use std::io;

use tileproxy::config::ConfigFileError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration or argument problem.
    Config(String),
    /// Resource list could not be loaded.
    Resources(tileproxy::Error),
    /// Some resources could not be prepared.
    Prepare { failed: usize, total: usize },
    /// Generating or serving a file failed.
    Serve(tileproxy::Error),
    /// Warper pool or raster operation failed.
    Warper(tileproxy::Error),
    /// Local file could not be read or written.
    Io(io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Resources(e) => write!(f, "Failed to load resources: {}", e),
            CliError::Prepare { failed, total } => {
                write!(f, "{} of {} resources failed to prepare", failed, total)
            }
            CliError::Serve(e) => write!(f, "Failed to serve file: {}", e),
            CliError::Warper(e) => write!(f, "Warper error: {}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) | CliError::Prepare { .. } => None,
            CliError::Resources(e) | CliError::Serve(e) | CliError::Warper(e) => Some(e),
            CliError::Io(e) => Some(e),
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Serve(e) if e.is_not_found() => 3,
            _ => 1,
        }
    }
}
