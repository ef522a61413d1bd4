//! `config.toml` loading under the XDG config dir.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::RuntimeConfig;

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("sdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Parse a TOML document. Missing keys stay zero and resolve to defaults.
pub fn from_toml_str(data: &str) -> Result<RuntimeConfig> {
    toml::from_str(data).context("invalid sdm config")
}

/// Load configuration from disk, writing an all-defaults file if none exists.
pub fn load_or_init() -> Result<RuntimeConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RuntimeConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    from_toml_str(&data)
}
