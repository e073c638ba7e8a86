//! Patch file codecs.
//!
//! Every patch kind has a CSV form (human-edited source) and a binary form
//! (fast cache). CSV is parsed once, after which an equivalent `.bin` file is
//! written next to it. Later loads prefer the binary unless the CSV has been
//! modified since.
//!
//! ```text
//!   layer_A_site@0_2018_grid.csv ──parse──► PatchData ──save──► layer_A_site@0_2018_grid.bin
//!                                               ▲                          │
//!                                               └──────────read────────────┘
//! ```

mod binary;
mod csv;
mod error;
pub mod graph;
pub mod grid;
pub mod multi_grid;
pub mod point;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, error};

use crate::data::{PatchData, PatchKind};

pub use binary::{FILE_TOKEN, FILE_VERSION, MAX_CHUNK_BYTES};
pub use error::CodecError;
pub use graph::{BuildReport, GraphBuilder, MIN_CELL_DELTA};

/// On-disk representation of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchFormat {
    Csv,
    Bin,
}

impl PatchFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PatchFormat::Csv => "csv",
            PatchFormat::Bin => "bin",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("csv") {
            Some(PatchFormat::Csv)
        } else if ext.eq_ignore_ascii_case("bin") {
            Some(PatchFormat::Bin)
        } else {
            None
        }
    }
}

/// Path of `stem` with the extension of `format`.
pub fn path_for(stem: &Path, format: PatchFormat) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(".");
    name.push(format.extension());
    PathBuf::from(name)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Picks the file to load for a patch stem: the binary, unless the CSV is
/// strictly newer or the binary is missing.
pub fn select_source(stem: &Path) -> Option<(PathBuf, PatchFormat)> {
    let csv = path_for(stem, PatchFormat::Csv);
    let bin = path_for(stem, PatchFormat::Bin);
    match (modified(&csv), modified(&bin)) {
        (Some(csv_time), Some(bin_time)) if csv_time > bin_time => Some((csv, PatchFormat::Csv)),
        (_, Some(_)) => Some((bin, PatchFormat::Bin)),
        (Some(_), None) => Some((csv, PatchFormat::Csv)),
        (None, None) => None,
    }
}

// =============================================================================
// Reading
// =============================================================================

pub fn read_csv(kind: PatchKind, path: &Path) -> Result<PatchData, CodecError> {
    let reader = BufReader::new(File::open(path)?);
    let source = path.display().to_string();
    Ok(match kind {
        PatchKind::Grid => PatchData::Grid(grid::read_csv(reader, &source)?),
        PatchKind::Point => PatchData::Point(point::read_csv(reader, &source)?),
        PatchKind::Graph => PatchData::Graph(graph::read_csv(reader, &source)?),
        PatchKind::MultiGrid => PatchData::MultiGrid(multi_grid::read_csv(reader, &source)?),
    })
}

pub fn read_bin(kind: PatchKind, path: &Path) -> Result<PatchData, CodecError> {
    let mut reader = BufReader::new(File::open(path)?);
    Ok(match kind {
        PatchKind::Grid => PatchData::Grid(grid::read_bin(&mut reader)?),
        PatchKind::Point => PatchData::Point(point::read_bin(&mut reader)?),
        PatchKind::Graph => PatchData::Graph(graph::read_bin(&mut reader)?),
        PatchKind::MultiGrid => PatchData::MultiGrid(multi_grid::read_bin(&mut reader)?),
    })
}

/// Reads bounds, properties and metadata of a binary file without its samples.
pub fn read_header(kind: PatchKind, path: &Path) -> Result<PatchData, CodecError> {
    let mut reader = BufReader::new(File::open(path)?);
    Ok(match kind {
        PatchKind::Grid => PatchData::Grid(grid::read_bin_header(&mut reader)?),
        PatchKind::Point => PatchData::Point(point::read_bin_header(&mut reader)?),
        PatchKind::Graph => PatchData::Graph(graph::read_bin_header(&mut reader)?),
        PatchKind::MultiGrid => PatchData::MultiGrid(multi_grid::read_bin_header(&mut reader)?),
    })
}

/// Reads a file in either format.
pub fn read_file(kind: PatchKind, path: &Path) -> Result<PatchData, CodecError> {
    match PatchFormat::from_path(path) {
        Some(PatchFormat::Csv) => read_csv(kind, path),
        Some(PatchFormat::Bin) => read_bin(kind, path),
        None => Err(CodecError::UnsupportedKind(path.display().to_string())),
    }
}

/// Loads a patch by stem, preferring the binary cache. A freshly parsed
/// CSV is persisted as binary; failing to write it is logged, not fatal.
pub fn load(kind: PatchKind, stem: &Path) -> Result<(PatchData, PatchFormat), CodecError> {
    let (path, format) = select_source(stem)
        .ok_or_else(|| CodecError::UnsupportedKind(format!("no csv or bin for {}", stem.display())))?;
    match format {
        PatchFormat::Bin => Ok((read_bin(kind, &path)?, format)),
        PatchFormat::Csv => {
            let data = read_csv(kind, &path)?;
            let bin = path_for(stem, PatchFormat::Bin);
            match save_bin(&data, &bin) {
                Ok(()) => debug!(file = %bin.display(), "Wrote binary cache"),
                Err(e) => error!(file = %bin.display(), error = %e, "Failed to write binary cache"),
            }
            Ok((data, format))
        }
    }
}

// =============================================================================
// Writing
// =============================================================================

fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    let temp_path = path.with_extension("tmp");
    let result = (|| {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        write(&mut writer)?;
        writer.flush()?;
        Ok::<_, CodecError>(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Writes a loaded patch in binary form.
pub fn save_bin(data: &PatchData, path: &Path) -> Result<(), CodecError> {
    write_atomically(path, |w| match data {
        PatchData::Grid(d) => grid::write_bin(w, d),
        PatchData::Point(d) => point::write_bin(w, d),
        PatchData::Graph(d) => graph::write_bin(w, d),
        PatchData::MultiGrid(d) => multi_grid::write_bin(w, d),
    })
}

/// Writes a loaded patch in CSV form.
pub fn save_csv(data: &PatchData, path: &Path) -> Result<(), CodecError> {
    write_atomically(path, |w| match data {
        PatchData::Grid(d) => grid::write_csv(w, d),
        PatchData::Point(d) => point::write_csv(w, d),
        PatchData::Graph(d) => graph::write_csv(w, d),
        PatchData::MultiGrid(d) => multi_grid::write_csv(w, d),
    })
}

/// Parses a CSV file and writes its binary sibling. Returns the binary path.
pub fn convert_csv(kind: PatchKind, csv_path: &Path) -> Result<PathBuf, CodecError> {
    let data = read_csv(kind, csv_path)?;
    let bin = csv_path.with_extension(PatchFormat::Bin.extension());
    save_bin(&data, &bin)?;
    Ok(bin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};

    const GRID: &str = "West,0\nEast,1\nNorth,1\nSouth,0\nCount X,1\nCount Y,1\nVALUE\n5,1\n";

    #[test]
    fn test_path_for_keeps_dots_in_stem() {
        let stem = Path::new("/data/Site/pop_A_Site@0_2018_grid");
        assert_eq!(
            path_for(stem, PatchFormat::Bin),
            PathBuf::from("/data/Site/pop_A_Site@0_2018_grid.bin")
        );
    }

    #[test]
    fn test_load_csv_writes_bin_then_prefers_it() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stem = temp_dir.path().join("pop_A_Site@0_2018_grid");
        fs::write(path_for(&stem, PatchFormat::Csv), GRID).unwrap();

        let (data, format) = load(PatchKind::Grid, &stem).unwrap();
        assert_eq!(format, PatchFormat::Csv);
        assert!(data.is_loaded());
        let bin = path_for(&stem, PatchFormat::Bin);
        assert!(bin.exists());

        // Make the binary clearly newer
        set_file_mtime(&path_for(&stem, PatchFormat::Csv), FileTime::from_unix_time(1_000, 0))
            .unwrap();
        let (_, format) = load(PatchKind::Grid, &stem).unwrap();
        assert_eq!(format, PatchFormat::Bin);
    }

    #[test]
    fn test_newer_csv_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stem = temp_dir.path().join("pop_A_Site@0_2018_grid");
        let csv = path_for(&stem, PatchFormat::Csv);
        fs::write(&csv, GRID).unwrap();
        convert_csv(PatchKind::Grid, &csv).unwrap();

        let bin = path_for(&stem, PatchFormat::Bin);
        set_file_mtime(&bin, FileTime::from_unix_time(1_000, 0)).unwrap();
        set_file_mtime(&csv, FileTime::from_unix_time(2_000, 0)).unwrap();
        assert_eq!(select_source(&stem).map(|(_, f)| f), Some(PatchFormat::Csv));

        // Equal timestamps keep the binary
        set_file_mtime(&csv, FileTime::from_unix_time(1_000, 0)).unwrap();
        assert_eq!(select_source(&stem).map(|(_, f)| f), Some(PatchFormat::Bin));
    }

    #[test]
    fn test_missing_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stem = temp_dir.path().join("nothing_A_here@0_2018_grid");
        assert!(select_source(&stem).is_none());
        assert!(matches!(
            load(PatchKind::Grid, &stem),
            Err(CodecError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_header_read_of_saved_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv = temp_dir.path().join("pop_A_Site@0_2018_grid.csv");
        fs::write(&csv, GRID).unwrap();
        let bin = convert_csv(PatchKind::Grid, &csv).unwrap();

        let header = read_header(PatchKind::Grid, &bin).unwrap();
        assert!(!header.is_loaded());
        assert_eq!(header.bounds().east, 1.0);

        let full = read_file(PatchKind::Grid, &bin).unwrap();
        assert_eq!(full.value_range(), Some((5.0, 5.0)));
    }
}
