//! Patch payloads.
//!
//! Every patch on disk decodes into one of four payload kinds, held in the
//! [`PatchData`] enum:
//!
//! - [`GridData`] - a rectangular raster, row-major north to south
//! - [`PointData`] - an unordered set of valued points
//! - [`GraphData`] - a road network with classified edges
//! - [`MultiGridData`] - a bundle of named grids sharing one extent
//!
//! A payload is either *loaded* (sample arrays present) or *unloaded*
//! (bounds, properties and metadata only, as read from a binary header).
//! Unloading never touches the header fields, so an unloaded patch can
//! still take part in visibility selection.

mod distribution;
mod graph;
mod grid;
mod multi_grid;
mod point;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::category::IntCategory;

pub use distribution::Distribution;
pub use graph::{Classification, GraphData, GraphLink, GraphNode, NodeCell};
pub use grid::{Coloring, GridData};
pub(crate) use grid::padded_mask_len;
pub use multi_grid::{GridCategory, MultiGridData};
pub use point::{PointData, PointSamples};

// =============================================================================
// Bounds
// =============================================================================

/// Geographic rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bounds {
    pub west: f64,
    pub east: f64,
    pub north: f64,
    pub south: f64,
}

impl Bounds {
    pub fn new(west: f64, east: f64, north: f64, south: f64) -> Self {
        Self {
            west,
            east,
            north,
            south,
        }
    }

    /// An inverted rectangle that any `expand` call will overwrite.
    pub fn inverted() -> Self {
        Self {
            west: f64::MAX,
            east: f64::MIN,
            north: f64::MIN,
            south: f64::MAX,
        }
    }

    /// Open intersection test: rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.east > other.west
            && self.west < other.east
            && self.north > other.south
            && self.south < other.north
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    pub fn expand(&mut self, lon: f64, lat: f64) {
        self.west = self.west.min(lon);
        self.east = self.east.max(lon);
        self.north = self.north.max(lat);
        self.south = self.south.min(lat);
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            west: self.west.min(other.west),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
            south: self.south.min(other.south),
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn is_valid(&self) -> bool {
        self.east >= self.west && self.north >= self.south
    }

    /// Width and height in Web Mercator meters.
    pub fn size_in_meters(&self) -> (f64, f64) {
        let x = (self.east - self.west).abs() * DEG_TO_METERS;
        let y = (mercator_y(self.north) - mercator_y(self.south)).abs();
        (x, y)
    }
}

const EARTH_RADIUS: f64 = 6_378_137.0;
const DEG_TO_METERS: f64 = std::f64::consts::PI * EARTH_RADIUS / 180.0;

fn mercator_y(lat: f64) -> f64 {
    ((90.0 + lat) * std::f64::consts::PI / 360.0).tan().ln() * EARTH_RADIUS
}

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate metadata key: {0}")]
pub struct DuplicateKeyError(pub String);

/// Ordered free-form key/value pairs. Keys are unique (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Metadata {
    pairs: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DuplicateKeyError> {
        let key = key.into();
        if self.get(&key).is_some() {
            return Err(DuplicateKeyError(key));
        }
        self.pairs.push((key, value.into()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// =============================================================================
// PatchKind
// =============================================================================

/// The payload kind of a patch, encoded as the `type` component of its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Grid,
    Point,
    Graph,
    MultiGrid,
}

impl PatchKind {
    pub const ALL: [PatchKind; 4] = [
        PatchKind::Grid,
        PatchKind::Point,
        PatchKind::Graph,
        PatchKind::MultiGrid,
    ];

    /// Filename suffix for this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            PatchKind::Grid => "grid",
            PatchKind::Point => "point",
            PatchKind::Graph => "graph",
            PatchKind::MultiGrid => "multi",
        }
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for PatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatchKind::ALL
            .into_iter()
            .find(|k| k.suffix().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

// =============================================================================
// PatchData
// =============================================================================

/// A decoded patch payload of any kind.
#[derive(Debug, Clone)]
pub enum PatchData {
    Grid(GridData),
    Point(PointData),
    Graph(GraphData),
    MultiGrid(MultiGridData),
}

impl PatchData {
    pub fn kind(&self) -> PatchKind {
        match self {
            PatchData::Grid(_) => PatchKind::Grid,
            PatchData::Point(_) => PatchKind::Point,
            PatchData::Graph(_) => PatchKind::Graph,
            PatchData::MultiGrid(_) => PatchKind::MultiGrid,
        }
    }

    pub fn bounds(&self) -> Bounds {
        match self {
            PatchData::Grid(d) => d.bounds,
            PatchData::Point(d) => d.bounds,
            PatchData::Graph(d) => d.bounds,
            PatchData::MultiGrid(d) => d.bounds,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            PatchData::Grid(d) => &d.metadata,
            PatchData::Point(d) => &d.metadata,
            PatchData::Graph(d) => &d.metadata,
            PatchData::MultiGrid(d) => &d.metadata,
        }
    }

    pub fn is_loaded(&self) -> bool {
        match self {
            PatchData::Grid(d) => d.is_loaded(),
            PatchData::Point(d) => d.is_loaded(),
            PatchData::Graph(d) => d.is_loaded(),
            PatchData::MultiGrid(d) => d.is_loaded(),
        }
    }

    /// Drops sample arrays, keeping bounds, properties and metadata.
    pub fn unload(&mut self) {
        match self {
            PatchData::Grid(d) => d.unload(),
            PatchData::Point(d) => d.unload(),
            PatchData::Graph(d) => d.unload(),
            PatchData::MultiGrid(d) => d.unload(),
        }
    }

    /// Value range of the loaded samples, if the kind carries scalar values.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        match self {
            PatchData::Grid(d) if d.is_loaded() => Some((d.min_value, d.max_value)),
            PatchData::Point(d) if d.is_loaded() => Some((d.min_value, d.max_value)),
            PatchData::MultiGrid(d) if d.is_loaded() => d.value_range(),
            _ => None,
        }
    }

    /// Sum and count of valid loaded samples, used for running means.
    pub fn value_sum(&self) -> Option<(f64, usize)> {
        match self {
            PatchData::Grid(d) => d.value_sum(),
            PatchData::Point(d) => d.value_sum(),
            _ => None,
        }
    }
}

// =============================================================================
// Category remapping
// =============================================================================

/// Remaps raw category values to dense indices `0..categories.len()`.
///
/// Each category's `value` is rewritten to its index. Values with no
/// matching category receive negative placeholder ids (-1, -2, ...), one per
/// distinct unmapped value. Masked-out cells are left untouched. Returns the
/// number of distinct unmapped values.
pub(crate) fn remap_categories(
    values: &mut [f32],
    mask: Option<&[u8]>,
    categories: &mut [IntCategory],
    source: &str,
) -> usize {
    let mut lookup: Vec<(i32, i32)> = Vec::with_capacity(categories.len());
    for (index, category) in categories.iter().enumerate() {
        if lookup.iter().any(|(raw, _)| *raw == category.value) {
            warn!(
                file = source,
                category = %category.name,
                value = category.value,
                "Duplicate category value, keeping the first"
            );
            continue;
        }
        lookup.push((category.value, index as i32));
    }

    let mut placeholders: Vec<(i32, i32)> = Vec::new();
    for (i, value) in values.iter_mut().enumerate() {
        if mask.is_some_and(|m| m[i] == 0) {
            continue;
        }
        let raw = *value as i32;
        let mapped = match lookup.iter().find(|(r, _)| *r == raw) {
            Some((_, index)) => *index,
            None => match placeholders.iter().find(|(r, _)| *r == raw) {
                Some((_, id)) => *id,
                None => {
                    let id = -(placeholders.len() as i32) - 1;
                    warn!(
                        file = source,
                        value = raw,
                        placeholder = id,
                        "Value has no category"
                    );
                    placeholders.push((raw, id));
                    id
                }
            },
        };
        *value = mapped as f32;
    }

    for (index, category) in categories.iter_mut().enumerate() {
        category.value = index as i32;
    }

    placeholders.len()
}
