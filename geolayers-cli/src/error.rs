//! CLI error handling with user-friendly messages.

use std::fmt;
use std::path::PathBuf;
use std::process;

use geolayers::config::ConfigError;
use geolayers::discovery::DiscoveryError;
use geolayers::filename::FilenameError;
use geolayers::io::CodecError;

#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    Config(ConfigError),
    /// File name does not follow the patch naming scheme
    Filename { path: PathBuf, error: FilenameError },
    /// Failed to read or write a patch file
    Codec { path: PathBuf, error: CodecError },
    Discovery(DiscoveryError),
    Output(String),
}

impl CliError {
    /// Print the error and exit with a non-zero code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Filename { .. } = self {
            eprintln!();
            eprintln!("Patch files are named <layer>_<level>_<site>@<n>_<yyyy[mm[dd]]>_<type>.<csv|bin>");
            eprintln!("  e.g. population_A_Amsterdam@0_2018_grid.csv");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Filename { path, error } => {
                write!(f, "Invalid patch file name '{}': {}", path.display(), error)
            }
            CliError::Codec { path, error } => write!(f, "{}: {}", path.display(), error),
            CliError::Discovery(e) => write!(f, "Scan failed: {}", e),
            CliError::Output(msg) => write!(f, "Failed to write output: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Filename { error, .. } => Some(error),
            CliError::Codec { error, .. } => Some(error),
            CliError::Discovery(e) => Some(e),
            CliError::Output(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<DiscoveryError> for CliError {
    fn from(e: DiscoveryError) -> Self {
        CliError::Discovery(e)
    }
}
