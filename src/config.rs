// src/config.rs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::logging::{PROJECT_NAME, get_config_dir, get_data_dir};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },
}

/// Vulnerability database client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NvdSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Minimum spacing between two requests, in milliseconds.
    pub rate_limit_delay_ms: u64,
    pub timeout_secs: u64,
    pub results_per_page: u32,
}

impl Default for NvdSettings {
    fn default() -> Self {
        Self {
            api_url: "https://services.nvd.nist.gov/rest/json/cves/2.0".to_string(),
            api_key: None,
            rate_limit_delay_ms: 6000,
            timeout_secs: 30,
            results_per_page: 20,
        }
    }
}

/// How the external scanner is found and started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherSettings {
    /// Script location relative to each candidate base directory.
    pub script_subpath: PathBuf,
    pub primary_interpreter: String,
    pub fallback_interpreter: String,
    /// Environment variable extended with `library_path` for the child.
    pub library_path_var: String,
    pub library_path: Option<String>,
    /// Base directory for the script search. Defaults to the process cwd.
    pub working_dir: Option<PathBuf>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            script_subpath: PathBuf::from("scanner").join("scanner.py"),
            primary_interpreter: "python3".to_string(),
            fallback_interpreter: "python".to_string(),
            library_path_var: "PYTHONPATH".to_string(),
            library_path: None,
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON file holding persisted scans. Defaults to the data directory.
    pub path: Option<PathBuf>,
}

impl StoreSettings {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("scans.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub nvd: NvdSettings,
    pub launcher: LauncherSettings,
    pub store: StoreSettings,
}

impl Settings {
    /// Defaults, then the config file in the project config dir, then
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = get_config_dir().join(CONFIG_FILE);
        let mut settings = Self::from_file(&path)?.unwrap_or_default();
        settings.apply_env(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    /// Reads a config file. A missing file is not an error.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults.");
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded config file.");
        Ok(Some(settings))
    }

    /// Applies `<PROJECT>_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| format!("{}_{}", PROJECT_NAME.as_str(), suffix);
        let get = |suffix: &str| {
            lookup(&var(suffix))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse_u64 = |suffix: &str, value: String| {
            value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                var: var(suffix),
                value,
            })
        };

        if let Some(url) = get("NVD_API_URL") {
            self.nvd.api_url = url;
        }
        if let Some(key) = get("NVD_API_KEY") {
            self.nvd.api_key = Some(key);
        }
        if let Some(delay) = get("NVD_RATE_LIMIT_MS") {
            self.nvd.rate_limit_delay_ms = parse_u64("NVD_RATE_LIMIT_MS", delay)?;
        }
        if let Some(timeout) = get("NVD_TIMEOUT_SECS") {
            self.nvd.timeout_secs = parse_u64("NVD_TIMEOUT_SECS", timeout)?;
        }
        if let Some(script) = get("SCANNER_SCRIPT") {
            self.launcher.script_subpath = PathBuf::from(script);
        }
        if let Some(lib) = get("PYTHON_PATH") {
            self.launcher.library_path = Some(lib);
        }
        if let Some(dir) = get("DATA_DIR") {
            self.store.path = Some(PathBuf::from(dir).join("scans.json"));
        }
        Ok(())
    }
}
