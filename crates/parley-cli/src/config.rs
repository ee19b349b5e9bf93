//! Configuration file resolution
//!
//! Loads configuration from `--config`, `PARLEY_CONFIG`, or
//! ~/.config/parley/config.toml, then applies secret overrides from the
//! environment.

use anyhow::Result;
use parley_core::ParleyConfig;
use std::path::{Path, PathBuf};

/// Get the default configuration file path
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("parley").join("config.toml"))
}

/// Load the effective configuration.
///
/// An explicitly named file must exist; a missing default file just means
/// built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<(ParleyConfig, Option<PathBuf>)> {
    let (mut config, source) = load_from(explicit, default_path())?;
    config.apply_env_overrides();
    Ok((config, source))
}

fn load_from(
    explicit: Option<&Path>,
    default: Option<PathBuf>,
) -> Result<(ParleyConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = ParleyConfig::load_from_path(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }

    match default {
        Some(path) if path.exists() => {
            let config = ParleyConfig::load_from_path(&path)?;
            Ok((config, Some(path)))
        }
        _ => Ok((ParleyConfig::default(), None)),
    }
}
