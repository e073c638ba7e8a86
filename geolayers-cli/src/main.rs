//! geolayers CLI - inspect, convert and scan patch files.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use geolayers::config::{EngineConfig, DEFAULT_CONFIG_FILE};
use geolayers::logging::init_logging;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "geolayers")]
#[command(about = "Inspect, convert and scan geolayers patch files", long_about = None)]
struct Args {
    /// Config file (default: ./geolayers.ini, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a patch file summary as JSON
    Inspect {
        /// A .csv or .bin patch file
        file: PathBuf,
    },
    /// Parse CSV patch files and write their .bin siblings
    Convert {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Discover sites and patches and print a summary
    Scan {
        /// Data root (default: [data] dir from the config)
        data_dir: Option<PathBuf>,

        /// Files handled per scan step
        #[arg(long)]
        budget: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("geolayers").join(DEFAULT_CONFIG_FILE))
        .unwrap_or(local)
}

fn run(args: Args) -> Result<(), CliError> {
    let mut config = EngineConfig::load_from(&config_path(args.config))?;
    if let Some(dir) = args.log_dir {
        config = config.with_log_dir(dir);
    }
    let _guard = init_logging(&config.log_dir, &config.log_file).map_err(CliError::LoggingInit)?;

    let result = match args.command {
        Command::Inspect { file } => commands::inspect::run(&file),
        Command::Convert { files } => commands::convert::run(&files),
        Command::Scan {
            data_dir,
            budget,
            json,
        } => {
            let dir = data_dir.unwrap_or_else(|| config.data_dir.clone());
            commands::scan::run(&dir, budget.unwrap_or(config.scan_budget), json)
        }
    };
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        e.exit();
    }
}
