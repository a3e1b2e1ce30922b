//! Configuration for tileproxy.
//!
//! User settings live in `~/.tileproxy/config.ini` and are loaded into a
//! [`ConfigFile`]; missing keys fall back to the constants in [`defaults`].
//! Runtime components take their own builder-style configs
//! ([`crate::warper::WarperConfig`], [`crate::tiling::TilingConfig`]) which
//! are derived from the file via [`ConfigFile::warper_config`] and
//! [`ConfigFile::tiling_config`].
//!
//! # Example
//!
//! ```
//! use tileproxy::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! let warper = config.warper_config();
//! assert!(warper.workers >= 1);
//! ```

pub mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, LoggingSettings, ServingSettings, StoreSettings, TilingSettings, WarperSettings,
};
pub use size::{format_size, parse_size, SizeParseError};
