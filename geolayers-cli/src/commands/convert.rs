//! `convert` - parse CSV patches and write their binary siblings.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use geolayers::filename::PatchFilename;
use geolayers::io::{self, PatchFormat};

use crate::error::CliError;

/// Converts every file; failures are reported and the first one returned
/// after the rest have been tried.
pub fn run(files: &[PathBuf]) -> Result<(), CliError> {
    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut first_error = None;
    let mut converted = 0usize;
    for path in files {
        progress.set_message(path.display().to_string());
        match convert(path) {
            Ok(bin) => {
                converted += 1;
                info!(file = %path.display(), output = %bin.display(), "Converted");
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "Conversion failed");
                progress.println(format!("{}", e));
                first_error.get_or_insert(e);
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();
    println!("Converted {} of {} files", converted, files.len());

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub fn convert(path: &Path) -> Result<PathBuf, CliError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (filename, format) =
        PatchFilename::parse_with_format(&name).map_err(|error| CliError::Filename {
            path: path.to_path_buf(),
            error,
        })?;
    if format != PatchFormat::Csv {
        return Err(CliError::Output(format!(
            "{} is already binary",
            path.display()
        )));
    }
    io::convert_csv(filename.kind, path).map_err(|error| CliError::Codec {
        path: path.to_path_buf(),
        error,
    })
}
