use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::data::Bounds;

use super::{LayerId, LayerSiteId, PatchId, RecordId, SiteId};

/// A named study area.
#[derive(Debug, Clone)]
pub struct Site {
    pub name: String,
    /// Folder new patch files for this site are written to.
    pub dir: PathBuf,
    /// Layers with data for this site, in discovery order.
    pub layers: Vec<LayerId>,
    /// Union of all patch bounds. `None` until computed.
    pub(crate) bounds: Option<Bounds>,
}

impl Site {
    pub(crate) fn new(name: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            dir,
            layers: Vec::new(),
            bounds: None,
        }
    }

    pub fn has_layer(&self, layer: LayerId) -> bool {
        self.layers.contains(&layer)
    }
}

/// The data of one layer for one site at one level, across years.
#[derive(Debug, Clone)]
pub struct LayerSite {
    pub layer: LayerId,
    pub site: SiteId,
    pub level: usize,
    /// Year to record, one record per year.
    pub records: BTreeMap<i32, RecordId>,
    /// Running range of every patch loaded so far. `None` until the first
    /// load.
    pub value_range: Option<(f32, f32)>,
    /// Highest patch mean seen, normalized to the running range.
    pub mean: f32,
}

impl LayerSite {
    pub(crate) fn new(layer: LayerId, site: SiteId, level: usize) -> Self {
        Self {
            layer,
            site,
            level,
            records: BTreeMap::new(),
            value_range: None,
            mean: 0.0,
        }
    }

    /// The record with the greatest year.
    pub fn last_record(&self) -> Option<RecordId> {
        self.records.values().next_back().copied()
    }

    pub fn record(&self, year: i32) -> Option<RecordId> {
        self.records.get(&year).copied()
    }

    pub fn has_range(&self) -> bool {
        self.value_range.is_some()
    }

    /// Widens the running range to include `min..=max`.
    pub fn fold_range(&mut self, min: f32, max: f32) {
        self.value_range = Some(match self.value_range {
            Some((lo, hi)) => (lo.min(min), hi.max(max)),
            None => (min, max),
        });
    }

    /// Maps a normalized 0-1 filter onto the running range.
    pub fn lerp(&self, t: f32) -> Option<f32> {
        self.value_range.map(|(min, max)| min + (max - min) * t)
    }
}

/// One year's patches for a layer site.
#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub layer_site: LayerSiteId,
    pub year: i32,
    pub patches: Vec<PatchId>,
}
