//! Engine and layer configuration.
//!
//! - [`EngineConfig`] comes from an INI file (`geolayers.ini`) with `[data]`
//!   and `[logging]` sections. Missing keys take the `DEFAULT_*` values.
//! - [`LayerConfig`] comes from `layers.csv` in the data root and names the
//!   layer groups and colors. Layers found on disk but not listed there end
//!   up in the default group.

mod engine;
mod layers;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::{
    default_data_dir, EngineConfig, DEFAULT_CONFIG_FILE, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE,
    DEFAULT_SCAN_BUDGET,
};
pub use layers::{LayerConfig, LayerEntry, LayerGroup, LAYERS_FILE};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the INI file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A key holds a value of the wrong shape
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("{file}:{line}: {reason}")]
    InvalidRow {
        file: PathBuf,
        line: usize,
        reason: String,
    },
}
