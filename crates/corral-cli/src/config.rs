//! Configuration file management for corral.
//!
//! The config file is a TOML rendering of [`HarnessConfig`] at
//! `~/.config/corral/config.toml`, with a resolution chain of
//! CLI flag > env var > config file > default for the fields the CLI
//! exposes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use corral_core::config::HarnessConfig;

/// Return the corral config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/corral` or `~/.config/corral`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("corral");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("corral")
}

/// Return the path to the corral config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: HarnessConfig =
        toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write a config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &HarnessConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

/// Per-invocation overrides from CLI flags.
#[derive(Debug, Default)]
pub struct Overrides {
    pub cluster: Option<String>,
    pub ctl: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub launch_deadline: Option<u64>,
}

/// Resolve the effective configuration.
///
/// - Base: `--config <path>` if given (must exist), else the default
///   config file if present, else built-in defaults.
/// - `ctl` binary: `--ctl` flag > `CORRAL_CTL` env > config file > default.
/// - Remaining overrides are flag > config file.
pub fn resolve(config_flag: Option<&Path>, overrides: &Overrides) -> Result<HarnessConfig> {
    let mut config = match config_flag {
        Some(path) => load_config(path)?,
        None => {
            let default_path = config_path();
            if default_path.exists() {
                load_config(&default_path)?
            } else {
                HarnessConfig::default()
            }
        }
    };

    if let Some(ctl) = &overrides.ctl {
        config.ctl_binary = ctl.clone();
    } else if let Ok(ctl) = std::env::var("CORRAL_CTL") {
        config.ctl_binary = PathBuf::from(ctl);
    }

    if let Some(cluster) = &overrides.cluster {
        config.cluster_name = cluster.clone();
    }
    if let Some(batch_size) = overrides.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(deadline) = overrides.launch_deadline {
        config.launch_deadline_secs = Some(deadline);
    }

    Ok(config)
}
