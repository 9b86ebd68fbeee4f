//! Process-wide configuration and per-zone settings.
//!
//! `Config` holds host-level defaults persisted as TOML under
//! `~/.enclave/enclave.toml`. `ZoneSettings` is parsed from the
//! string-encoded option list passed at zone construction, e.g.
//! `"--bootstrapFile bootstrap.js --workers 4"`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{elog_debug, Error, Result};

/// Default number of workers per zone when neither the settings string nor
/// the host config specifies one.
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default worker count applied to zones constructed without `--workers`.
    pub default_workers: Option<usize>,
    /// Enable debug logging for all zones in this process.
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    pub fn enclave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".enclave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::enclave_dir()?.join("enclave.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            elog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        elog_debug!(
            "Config loaded: default_workers={:?}, debug={}",
            config.default_workers,
            config.debug
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let enclave_dir = Self::enclave_dir()?;
        if !enclave_dir.exists() {
            fs::create_dir_all(&enclave_dir)?;
        }
        fs::write(Self::config_path()?, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Immutable per-zone settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSettings {
    /// Number of workers in the zone's pool.
    pub workers: usize,
    /// Optional bootstrap script file, replayed into every worker before it
    /// is marked ready.
    pub bootstrap_file: Option<PathBuf>,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            bootstrap_file: None,
        }
    }
}

impl ZoneSettings {
    /// Parse a string-encoded option list.
    ///
    /// Recognized options:
    /// - `--bootstrapFile <path>`
    /// - `--workers <n>` (must be >= 1)
    ///
    /// Unknown options and missing values are validation errors, so typos
    /// fail zone construction instead of silently configuring nothing.
    pub fn parse(settings: &str) -> Result<Self> {
        let mut parsed = Self::default();
        let mut tokens = settings.split_whitespace();

        while let Some(flag) = tokens.next() {
            match flag {
                "--bootstrapFile" => {
                    let path = tokens.next().ok_or_else(|| {
                        Error::Validation("--bootstrapFile requires a path".to_string())
                    })?;
                    parsed.bootstrap_file = Some(PathBuf::from(path));
                }
                "--workers" => {
                    let value = tokens.next().ok_or_else(|| {
                        Error::Validation("--workers requires a count".to_string())
                    })?;
                    let count: usize = value.parse().map_err(|_| {
                        Error::Validation(format!("invalid worker count: {}", value))
                    })?;
                    if count == 0 {
                        return Err(Error::Validation(
                            "worker count must be at least 1".to_string(),
                        ));
                    }
                    parsed.workers = count;
                }
                other => {
                    return Err(Error::Validation(format!("unknown zone option: {}", other)));
                }
            }
        }

        Ok(parsed)
    }

    /// Parse settings, falling back to host config defaults for fields the
    /// option string leaves unset.
    pub fn parse_with_config(settings: &str, config: &Config) -> Result<Self> {
        let mut parsed = Self::parse(settings)?;
        if !settings.contains("--workers") {
            if let Some(workers) = config.default_workers {
                if workers > 0 {
                    parsed.workers = workers;
                }
            }
        }
        Ok(parsed)
    }
}
