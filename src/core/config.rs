//! Locating and loading the daemon configuration file.

use crate::constants;
use crate::models::config::DaemonConfig;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Pick the config path: explicit argument, then the environment, then the
/// packaged default.
pub fn resolve_path(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| {
        std::env::var_os(constants::CONFIG_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    })
    .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_CONFIG_PATH))
}

/// Load the config. A missing file yields the built-in defaults.
pub fn load(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let config: DaemonConfig = toml::from_str(&content)
        .with_context(|| format!("parse config {}", path.display()))?;
    validate(&config).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn validate(config: &DaemonConfig) -> Result<()> {
    if config.store.shadow_path.as_os_str().is_empty() {
        bail!("store.shadow_path must not be empty");
    }
    if config.store.lock_path == config.store.shadow_path {
        bail!("store.lock_path must differ from store.shadow_path");
    }
    for group in &config.provision.groups {
        if group.is_empty() || group.contains(',') {
            bail!("provision.groups entry '{}' is not a group name", group);
        }
    }
    Ok(())
}

/// Render the effective config back to TOML, for `doctor` output.
pub fn render(config: &DaemonConfig) -> Result<String> {
    toml::to_string_pretty(config).context("serialize config")
}
