//! Configuration CLI commands.
//!
//! Provides `config path`, `config show` and `config init` for inspecting
//! the settings in `~/.tileproxy/config.ini`.

use std::path::PathBuf;

use clap::Subcommand;
use tileproxy::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration, defaults included
    Show,

    /// Write a default configuration file if none exists
    Init,
}

/// Run a config subcommand.
///
/// `config_path` is the `--config` override; commands fall back to the
/// default location without it.
pub fn run(command: ConfigCommands, config_path: Option<PathBuf>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(config_path),
        ConfigCommands::Show => run_show(config_path),
        ConfigCommands::Init => run_init(config_path),
    }
}

fn run_path(config_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = config_path.unwrap_or_else(config_file_path);
    println!("{}", path.display());
    Ok(())
}

fn run_show(config_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = match &config_path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    print!("{}", config.to_config_string());
    Ok(())
}

fn run_init(config_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                ConfigFile::default().save_to(&path)?;
            }
            path
        }
        None => ConfigFile::ensure_exists()?,
    };
    println!("Configuration: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        run(ConfigCommands::Init, Some(path.clone())).unwrap();
        assert!(path.exists());

        let loaded = ConfigFile::load_from(&path).unwrap();
        let defaults = ConfigFile::default();
        assert_eq!(loaded.warper.workers, defaults.warper.workers);
        assert_eq!(loaded.store.root, defaults.store.root);
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[warper]\nworkers = 7\n").unwrap();

        run(ConfigCommands::Init, Some(path.clone())).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap().warper.workers, 7);
    }
}
