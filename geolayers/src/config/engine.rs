//! Engine settings from `geolayers.ini`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;

use super::ConfigError;
use crate::loader::{DEFAULT_CACHE_CAPACITY, DEFAULT_PARSE_QUEUE_CAPACITY};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "geolayers.ini";

/// Default number of files the scanner handles per step.
pub const DEFAULT_SCAN_BUDGET: usize = 500;

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_FILE: &str = "geolayers.log";

/// Data root used when none is configured.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("geolayers")
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Root holding one directory per site.
    pub data_dir: PathBuf,
    /// Out-of-view patches kept loaded.
    pub cache_capacity: u64,
    /// Jobs queued ahead of the parse worker.
    pub parse_queue_capacity: usize,
    /// Files handled per scanner step.
    pub scan_budget: usize,
    pub log_dir: PathBuf,
    pub log_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            parse_queue_capacity: DEFAULT_PARSE_QUEUE_CAPACITY,
            scan_budget: DEFAULT_SCAN_BUDGET,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads settings from an INI file. A missing file gives the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Overlays the values found in `ini` on the defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // [data] section
        if let Some(section) = ini.section(Some("data")) {
            if let Some(v) = section.get("dir") {
                let v = v.trim();
                if !v.is_empty() {
                    config.data_dir = expand_tilde(v);
                }
            }
            if let Some(v) = section.get("cache_capacity") {
                config.cache_capacity = parse_positive("data", "cache_capacity", v)?;
            }
            if let Some(v) = section.get("parse_queue_capacity") {
                config.parse_queue_capacity = parse_positive("data", "parse_queue_capacity", v)?;
            }
            if let Some(v) = section.get("scan_budget") {
                config.scan_budget = parse_positive("data", "scan_budget", v)?;
            }
        }

        // [logging] section
        if let Some(section) = ini.section(Some("logging")) {
            if let Some(v) = section.get("dir") {
                let v = v.trim();
                if !v.is_empty() {
                    config.log_dir = expand_tilde(v);
                }
            }
            if let Some(v) = section.get("file") {
                let v = v.trim();
                if v.is_empty() || v.contains(['/', '\\']) {
                    return Err(ConfigError::InvalidValue {
                        section: "logging".to_string(),
                        key: "file".to_string(),
                        value: v.to_string(),
                        reason: "must be a plain file name".to_string(),
                    });
                }
                config.log_file = v.to_string();
            }
        }

        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_parse_queue_capacity(mut self, capacity: usize) -> Self {
        self.parse_queue_capacity = capacity;
        self
    }

    pub fn with_scan_budget(mut self, budget: usize) -> Self {
        self.scan_budget = budget;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_log_file(mut self, file: impl Into<String>) -> Self {
        self.log_file = file.into();
        self
    }
}

fn parse_positive<T>(section: &str, key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a positive integer".to_string(),
        }),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
