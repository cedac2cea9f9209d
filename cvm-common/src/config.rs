//! Configuration management for the cvm host

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sandbox defaults applied by the CLI
    #[serde(default)]
    pub sandbox: SandboxSettings,
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Directory searched first by `require`
    #[serde(default = "SandboxSettings::default_module_path")]
    pub module_path: String,
    /// Gas budget per execution
    #[serde(default = "SandboxSettings::default_gas_limit")]
    pub gas_limit: u64,
    /// Wall-clock budget per execution
    #[serde(default = "SandboxSettings::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Supervisor sleep between limit checks
    #[serde(
        default = "SandboxSettings::default_poll_interval",
        with = "humantime_serde"
    )]
    pub poll_interval: Duration,
    /// V8 heap ceiling in bytes
    #[serde(default)]
    pub max_heap_bytes: Option<usize>,
    /// Startup snapshot to boot the engine from
    #[serde(default)]
    pub snapshot: Option<String>,
    /// Scripts evaluated, in order, before any user code runs
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            module_path: Self::default_module_path(),
            gas_limit: Self::default_gas_limit(),
            timeout: Self::default_timeout(),
            poll_interval: Self::default_poll_interval(),
            max_heap_bytes: None,
            snapshot: None,
            bootstrap: Vec::new(),
        }
    }
}

impl SandboxSettings {
    fn default_module_path() -> String {
        "v8/libjs".to_string()
    }

    fn default_gas_limit() -> u64 {
        1_000_000
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(1)
    }

    fn default_poll_interval() -> Duration {
        Duration::from_micros(10)
    }

    /// Expanded module search path
    pub fn module_path(&self) -> ConfigResult<PathBuf> {
        AppConfig::expand_path(&self.module_path)
    }

    /// Expanded snapshot path if provided
    pub fn snapshot_path(&self) -> ConfigResult<Option<PathBuf>> {
        match &self.snapshot {
            Some(path) => AppConfig::expand_path(path).map(Some),
            None => Ok(None),
        }
    }

    /// Expanded bootstrap script paths
    pub fn bootstrap_paths(&self) -> ConfigResult<Vec<PathBuf>> {
        self.bootstrap
            .iter()
            .map(|path| AppConfig::expand_path(path))
            .collect()
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults; nothing is written.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> ConfigResult<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".config").join("cvm").join("config.toml"))
    }

    fn expand_path(path: &str) -> ConfigResult<PathBuf> {
        if let Some(rest) = path.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
            Ok(home.join(rest))
        } else if path == "~" {
            dirs::home_dir().ok_or(ConfigError::NoHomeDir)
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
