use std::path::{Path, PathBuf};

use crate::data::{GridData, PatchData, PatchKind};
use crate::filename::PatchFilename;
use crate::io::{self, PatchFormat};

use super::RecordId;

/// One tile of a layer for a site, level and year.
#[derive(Debug, Clone)]
pub struct Patch {
    pub(crate) filename: PatchFilename,
    pub(crate) dir: PathBuf,
    pub(crate) record: RecordId,
    /// Bounds and properties always; samples only while loaded.
    pub data: PatchData,
    pub(crate) visible: bool,
}

impl Patch {
    pub fn filename(&self) -> &PatchFilename {
        &self.filename
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record(&self) -> RecordId {
        self.record
    }

    pub fn level(&self) -> usize {
        self.filename.level as usize
    }

    pub fn year(&self) -> i32 {
        self.filename.date.year
    }

    pub fn kind(&self) -> PatchKind {
        self.data.kind()
    }

    /// Path without extension; see [`io::path_for`].
    pub fn stem_path(&self) -> PathBuf {
        self.filename.stem_path(&self.dir)
    }

    pub fn path(&self, format: PatchFormat) -> PathBuf {
        io::path_for(&self.stem_path(), format)
    }

    /// True while a consumer is drawing this patch.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_loaded()
    }

    /// Grid drawn for this patch: the grid itself, or the density grid of a
    /// graph, built on first use.
    pub fn display_grid(&mut self) -> Option<&GridData> {
        match &mut self.data {
            PatchData::Grid(grid) => Some(grid),
            PatchData::Graph(graph) if graph.is_loaded() => Some(graph.density_grid()),
            _ => None,
        }
    }
}
