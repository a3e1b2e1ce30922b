//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("store")) {
        if let Some(v) = non_empty(section, "root") {
            config.store.root = expand_tilde(v);
        }
    }

    if let Some(section) = ini.section(Some("warper")) {
        if let Some(v) = section.get("workers") {
            let workers: usize = number(v, "warper", "workers", "a positive integer")?;
            if workers == 0 {
                return Err(invalid("warper", "workers", v, "must be at least 1"));
            }
            config.warper.workers = workers;
        }
        if let Some(v) = section.get("arena_size") {
            config.warper.arena_size = parse_size(v).map_err(|_| {
                invalid(
                    "warper",
                    "arena_size",
                    v,
                    "expected format like '64MB', '1GB', or '4096KB'",
                )
            })?;
        }
        if let Some(v) = section.get("timeout") {
            config.warper.timeout_secs =
                number(v, "warper", "timeout", "a positive integer (seconds)")?;
        }
        if let Some(v) = section.get("shutdown_grace_ms") {
            config.warper.shutdown_grace_ms = number(
                v,
                "warper",
                "shutdown_grace_ms",
                "a positive integer (milliseconds)",
            )?;
        }
        if let Some(v) = non_empty(section, "worker_binary") {
            config.warper.worker_binary = Some(expand_tilde(v));
        }
    }

    if let Some(section) = ini.section(Some("tiling")) {
        if let Some(v) = section.get("tile_sampling") {
            let sampling: u32 = number(v, "tiling", "tile_sampling", "a positive integer")?;
            if sampling == 0 {
                return Err(invalid("tiling", "tile_sampling", v, "must be at least 1"));
            }
            config.tiling.tile_sampling = sampling;
        }
        if let Some(v) = section.get("parallel") {
            config.tiling.parallel = boolean(v, "tiling", "parallel")?;
        }
        if let Some(v) = section.get("force_watertight") {
            config.tiling.force_watertight = boolean(v, "tiling", "force_watertight")?;
        }
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = v.to_string();
        }
        if let Some(v) = non_empty(section, "level") {
            let v = v.to_lowercase();
            let valid = ["error", "warn", "info", "debug", "trace"];
            if !valid.contains(&v.as_str()) {
                return Err(invalid(
                    "logging",
                    "level",
                    &v,
                    "must be one of: error, warn, info, debug, trace",
                ));
            }
            config.logging.level = v;
        }
    }

    if let Some(section) = ini.section(Some("serving")) {
        let ages = [
            ("max_age_config", &mut config.serving.max_age_config),
            ("max_age_support", &mut config.serving.max_age_support),
            ("max_age_registry", &mut config.serving.max_age_registry),
            ("max_age_data", &mut config.serving.max_age_data),
        ];
        for (key, slot) in ages {
            if let Some(v) = section.get(key) {
                *slot = number(v, "serving", key, "a positive integer (seconds)")?;
            }
        }
    }

    Ok(config)
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn number<T: FromStr>(
    v: &str,
    section: &str,
    key: &str,
    expected: &str,
) -> Result<T, ConfigFileError> {
    v.trim()
        .parse()
        .map_err(|_| invalid(section, key, v, &format!("must be {}", expected)))
}

fn boolean(v: &str, section: &str, key: &str) -> Result<bool, ConfigFileError> {
    match v.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(section, key, v, "must be true or false")),
    }
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.tiling.tile_sampling, 128);
        assert!(!config.tiling.force_watertight);
    }

    #[test]
    fn test_warper_section() {
        let config = parse(
            "[warper]\nworkers = 4\narena_size = 32MB\ntimeout = 15\nworker_binary = /opt/tp/tileproxy-warper\n",
        )
        .unwrap();
        assert_eq!(config.warper.workers, 4);
        assert_eq!(config.warper.arena_size, 32 * 1024 * 1024);
        assert_eq!(config.warper.timeout_secs, 15);
        assert_eq!(
            config.warper.worker_binary,
            Some(PathBuf::from("/opt/tp/tileproxy-warper"))
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = parse("[warper]\nworkers = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "workers"
        ));
    }

    #[test]
    fn test_bad_arena_size_names_key() {
        let err = parse("[warper]\narena_size = lots\n").unwrap_err();
        assert!(err.to_string().contains("warper.arena_size"));
    }

    #[test]
    fn test_tiling_booleans() {
        let config = parse("[tiling]\nparallel = no\nforce_watertight = true\n").unwrap();
        assert!(!config.tiling.parallel);
        assert!(config.tiling.force_watertight);

        assert!(parse("[tiling]\nparallel = maybe\n").is_err());
    }

    #[test]
    fn test_logging_level_validated() {
        assert_eq!(
            parse("[logging]\nlevel = DEBUG\n").unwrap().logging.level,
            "debug"
        );
        assert!(parse("[logging]\nlevel = loud\n").is_err());
    }

    #[test]
    fn test_serving_max_ages() {
        let config = parse("[serving]\nmax_age_config = 5\nmax_age_data = 99\n").unwrap();
        assert_eq!(config.serving.max_age_config, 5);
        assert_eq!(config.serving.max_age_data, 99);
        assert_eq!(config.serving.max_age_support, 3600);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/store"), home.join("store"));
        }
    }
}
