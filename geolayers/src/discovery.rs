//! Discovery of sites and patch files under the data root.
//!
//! ```text
//! <data root>/
//!   layers.csv
//!   Amsterdam/                      <- site directory
//!     pop_A_Amsterdam@0_2018_grid.bin
//!     pop_A_Amsterdam@0_2018_grid.csv
//!   _archive/                       <- ignored
//! ```
//!
//! [`PatchScanner`] walks the collected files a budget at a time so a caller
//! can interleave the scan with other work. Each step reads headers only;
//! samples are loaded later on demand. A CSV without a current binary is
//! converted first so its header can be read the cheap way next session.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, LayerConfig};
use crate::filename::PatchFilename;
use crate::io::{self, PatchFormat};
use crate::model::{Catalog, PatchId};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Data directory '{0}' does not exist")]
    RootMissing(PathBuf),

    #[error("Failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// True for directory names the scan skips.
fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

/// Site directories directly under `root`, sorted by name.
pub fn list_site_dirs(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }
    let entries = fs::read_dir(root).map_err(|source| DiscoveryError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DiscoveryError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !is_ignored_dir(name) => dirs.push(path),
            Some(name) => debug!(dir = name, "Skipping ignored directory"),
            None => warn!(dir = %path.display(), "Skipping directory with non UTF-8 name"),
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Patch stems in a site directory, one per CSV/BIN pair, sorted.
pub fn list_patch_stems(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut stems = BTreeSet::new();
    for format in [PatchFormat::Bin, PatchFormat::Csv] {
        let pattern = format!("{}/*.{}", escaped, format.extension());
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => {
                    stems.insert(path.with_extension(""));
                }
                Err(e) => warn!(error = %e, "Unreadable directory entry"),
            }
        }
    }
    Ok(stems.into_iter().collect())
}

/// Totals of a finished or ongoing scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files: usize,
    pub added: usize,
    pub converted: usize,
    pub skipped: usize,
}

/// Cooperative scanner over every patch stem of every site directory.
#[derive(Debug)]
pub struct PatchScanner {
    pending: VecDeque<PathBuf>,
    report: ScanReport,
}

impl PatchScanner {
    /// Lists the data root. No file is opened yet.
    pub fn new(root: &Path) -> Result<Self, DiscoveryError> {
        let mut pending = VecDeque::new();
        let dirs = list_site_dirs(root)?;
        for dir in &dirs {
            pending.extend(list_patch_stems(dir)?);
        }
        info!(
            root = %root.display(),
            sites = dirs.len(),
            files = pending.len(),
            "Found patch files"
        );
        Ok(Self {
            pending,
            report: ScanReport::default(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn report(&self) -> ScanReport {
        self.report
    }

    /// Handles up to `budget` patch files. Returns the patches added in this
    /// step.
    pub fn step(&mut self, catalog: &mut Catalog, budget: usize) -> Vec<PatchId> {
        let mut added = Vec::new();
        for _ in 0..budget.max(1) {
            let Some(stem) = self.pending.pop_front() else {
                break;
            };
            self.report.files += 1;
            match self.add_stem(catalog, &stem) {
                Some(id) => added.push(id),
                None => self.report.skipped += 1,
            }
        }
        self.report.added += added.len();
        debug!(
            added = added.len(),
            remaining = self.pending.len(),
            "Scan step"
        );
        added
    }

    /// Runs the scan to completion.
    pub fn run(mut self, catalog: &mut Catalog, budget: usize) -> ScanReport {
        while !self.is_done() {
            self.step(catalog, budget);
        }
        info!(
            added = self.report.added,
            converted = self.report.converted,
            skipped = self.report.skipped,
            "Scan finished"
        );
        self.report
    }

    fn add_stem(&mut self, catalog: &mut Catalog, stem: &Path) -> Option<PatchId> {
        let name = stem.file_name()?.to_string_lossy().into_owned();
        let filename = match PatchFilename::from_stem(&name) {
            Ok(f) => f,
            Err(e) => {
                warn!(file = %stem.display(), error = %e, "Skipping file with invalid name");
                return None;
            }
        };

        let (path, format) = io::select_source(stem)?;
        let bin = match format {
            PatchFormat::Bin => path,
            PatchFormat::Csv => match io::convert_csv(filename.kind, &path) {
                Ok(bin) => {
                    self.report.converted += 1;
                    bin
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Failed to convert patch");
                    return None;
                }
            },
        };

        let header = match io::read_header(filename.kind, &bin) {
            Ok(header) => header,
            Err(e) => {
                error!(file = %bin.display(), error = %e, "Failed to read patch header");
                return None;
            }
        };
        let dir = stem.parent()?.to_path_buf();
        catalog.add_patch(filename, dir, header)
    }
}

/// Loads the layer config and scans the data root into a fresh catalog.
pub fn scan_data_dir(root: &Path, budget: usize) -> Result<(Catalog, ScanReport), DiscoveryError> {
    let mut catalog = Catalog::new();
    LayerConfig::load_from_dir(root)?.apply(&mut catalog);
    let report = PatchScanner::new(root)?.run(&mut catalog, budget);
    Ok((catalog, report))
}
