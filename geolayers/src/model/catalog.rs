use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, error, warn};

use crate::category::Color;
use crate::data::{Bounds, PatchData};
use crate::filename::PatchFilename;

use super::{
    DataLayer, LayerId, LayerSite, LayerSiteId, ModelError, Patch, PatchId, RecordId, Site,
    SiteId, SiteRecord, YearFilter, DEFAULT_GROUP, MAX_LEVELS,
};

/// Result of a visibility pass for one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewUpdate {
    /// Patches that left the view, in view order.
    pub removed: Vec<PatchId>,
    /// Patches that entered the view, in catalog order.
    pub added: Vec<PatchId>,
}

impl ViewUpdate {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Arena owning every site, layer, record and patch.
#[derive(Debug, Default)]
pub struct Catalog {
    pub(crate) sites: Vec<Site>,
    pub(crate) layers: Vec<DataLayer>,
    pub(crate) layer_sites: Vec<LayerSite>,
    pub(crate) records: Vec<SiteRecord>,
    pub(crate) patches: Vec<Patch>,
    /// Lower-cased names.
    pub(crate) site_index: HashMap<String, SiteId>,
    pub(crate) layer_index: HashMap<String, LayerId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn site(&self, id: SiteId) -> &Site {
        &self.sites[id.index()]
    }

    pub fn layer(&self, id: LayerId) -> &DataLayer {
        &self.layers[id.index()]
    }

    pub fn layer_mut(&mut self, id: LayerId) -> &mut DataLayer {
        &mut self.layers[id.index()]
    }

    pub fn layer_site(&self, id: LayerSiteId) -> &LayerSite {
        &self.layer_sites[id.index()]
    }

    pub fn record(&self, id: RecordId) -> &SiteRecord {
        &self.records[id.index()]
    }

    pub fn patch(&self, id: PatchId) -> &Patch {
        &self.patches[id.index()]
    }

    pub fn patch_mut(&mut self, id: PatchId) -> &mut Patch {
        &mut self.patches[id.index()]
    }

    pub fn site_ids(&self) -> impl Iterator<Item = SiteId> {
        (0..self.sites.len()).map(SiteId::new)
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = LayerId> {
        (0..self.layers.len()).map(LayerId::new)
    }

    pub fn patch_ids(&self) -> impl Iterator<Item = PatchId> {
        (0..self.patches.len()).map(PatchId::new)
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    /// Case-insensitive site lookup.
    pub fn site_by_name(&self, name: &str) -> Option<SiteId> {
        self.site_index.get(&name.to_lowercase()).copied()
    }

    /// Case-insensitive layer lookup.
    pub fn layer_by_name(&self, name: &str) -> Option<LayerId> {
        self.layer_index.get(&name.to_lowercase()).copied()
    }

    pub fn patch_layer_site(&self, patch: PatchId) -> LayerSiteId {
        self.record(self.patch(patch).record).layer_site
    }

    pub fn patch_site(&self, patch: PatchId) -> SiteId {
        self.layer_site(self.patch_layer_site(patch)).site
    }

    pub fn patch_layer(&self, patch: PatchId) -> LayerId {
        self.layer_site(self.patch_layer_site(patch)).layer
    }

    /// Every patch a layer has for `site`, across levels and years.
    pub fn layer_site_patches(&self, layer_site: LayerSiteId) -> impl Iterator<Item = PatchId> + '_ {
        self.layer_site(layer_site)
            .records
            .values()
            .flat_map(|&r| self.record(r).patches.iter().copied())
    }

    /// Layer sites of `layer` belonging to `site`, one per level at most.
    pub fn layer_sites_of(&self, layer: LayerId, site: SiteId) -> Vec<LayerSiteId> {
        self.layer(layer)
            .levels
            .iter()
            .flat_map(|level| level.layer_sites.iter().copied())
            .filter(|&ls| self.layer_site(ls).site == site)
            .collect()
    }

    fn find_layer_site(&self, layer: LayerId, site: SiteId, level: usize) -> Option<LayerSiteId> {
        self.layer(layer).levels[level]
            .layer_sites
            .iter()
            .copied()
            .find(|&ls| self.layer_site(ls).site == site)
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Adds a site. Names are unique ignoring case.
    pub fn add_site(&mut self, name: &str, dir: PathBuf) -> Result<SiteId, ModelError> {
        let key = name.to_lowercase();
        if self.site_index.contains_key(&key) {
            return Err(ModelError::DuplicateSite(name.to_string()));
        }
        let id = SiteId::new(self.sites.len());
        self.sites.push(Site::new(name, dir));
        self.site_index.insert(key, id);
        Ok(id)
    }

    /// Adds a layer, or returns the existing one with that name.
    pub fn add_layer(&mut self, name: &str, color: Color, group: &str) -> LayerId {
        let key = name.to_lowercase();
        if let Some(&id) = self.layer_index.get(&key) {
            return id;
        }
        let id = LayerId::new(self.layers.len());
        self.layers.push(DataLayer::new(name, color, group));
        self.layer_index.insert(key, id);
        id
    }

    /// Registers a patch found on disk. The layer and site are created when
    /// missing. A patch whose level is out of range is logged and skipped.
    pub fn add_patch(
        &mut self,
        filename: PatchFilename,
        dir: PathBuf,
        data: PatchData,
    ) -> Option<PatchId> {
        let level = filename.level as usize;
        if level >= MAX_LEVELS {
            error!(
                patch = %filename,
                level,
                max = MAX_LEVELS,
                "Patch has an invalid level"
            );
            return None;
        }
        if data.kind() != filename.kind {
            error!(patch = %filename, kind = %data.kind(), "Patch data does not match its type");
            return None;
        }

        let layer = match self.layer_by_name(&filename.layer) {
            Some(id) => id,
            None => {
                debug!(layer = %filename.layer, "Layer not configured, adding to default group");
                self.add_layer(&filename.layer, Color::WHITE, DEFAULT_GROUP)
            }
        };
        if self.layer(layer).name != filename.layer {
            warn!(
                patch = %filename,
                layer = %self.layer(layer).name,
                "Patch layer name differs in case"
            );
        }

        let site = match self.site_by_name(&filename.site) {
            Some(id) => id,
            None => self.add_site_unchecked(&filename.site, dir.clone()),
        };

        let layer_site = match self.find_layer_site(layer, site, level) {
            Some(id) => id,
            None => {
                let id = LayerSiteId::new(self.layer_sites.len());
                self.layer_sites.push(LayerSite::new(layer, site, level));
                self.layers[layer.index()].levels[level].layer_sites.push(id);
                id
            }
        };

        let year = filename.date.year;
        let record = match self.layer_site(layer_site).record(year) {
            Some(id) => id,
            None => {
                let id = RecordId::new(self.records.len());
                self.records.push(SiteRecord {
                    layer_site,
                    year,
                    patches: Vec::new(),
                });
                self.layer_sites[layer_site.index()].records.insert(year, id);
                id
            }
        };

        let id = PatchId::new(self.patches.len());
        self.patches.push(Patch {
            filename,
            dir,
            record,
            data,
            visible: false,
        });
        self.records[record.index()].patches.push(id);

        let site_entry = &mut self.sites[site.index()];
        if !site_entry.has_layer(layer) {
            site_entry.layers.push(layer);
        }
        site_entry.bounds = None;
        Some(id)
    }

    fn add_site_unchecked(&mut self, name: &str, dir: PathBuf) -> SiteId {
        let id = SiteId::new(self.sites.len());
        self.sites.push(Site::new(name, dir));
        self.site_index.insert(name.to_lowercase(), id);
        id
    }

    /// Union of the bounds of every patch of the site, computed on demand.
    pub fn site_bounds(&mut self, site: SiteId) -> Bounds {
        if let Some(bounds) = self.sites[site.index()].bounds {
            return bounds;
        }
        let mut bounds = Bounds::inverted();
        for layer_site in &self.layer_sites {
            if layer_site.site != site {
                continue;
            }
            for record in layer_site.records.values() {
                for &patch in &self.records[record.index()].patches {
                    bounds = bounds.union(&self.patches[patch.index()].data.bounds());
                }
            }
        }
        self.sites[site.index()].bounds = Some(bounds);
        bounds
    }

    // =========================================================================
    // Visibility selection
    // =========================================================================

    /// Patches of `layer` that should be in view for a site, level and
    /// query rectangle under the layer's year filter.
    pub fn select_patches(
        &self,
        layer: LayerId,
        site: SiteId,
        level: usize,
        bounds: &Bounds,
    ) -> Vec<PatchId> {
        if level >= MAX_LEVELS {
            return Vec::new();
        }
        let data_layer = self.layer(layer);
        let mut selected = Vec::new();
        for &ls in &data_layer.levels[level].layer_sites {
            let layer_site = self.layer_site(ls);
            if layer_site.site != site {
                continue;
            }
            let record = match data_layer.visible_year {
                YearFilter::Latest => layer_site.last_record(),
                YearFilter::Fixed(year) => layer_site.record(year),
            };
            let Some(record) = record else { continue };
            selected.extend(
                self.record(record)
                    .patches
                    .iter()
                    .copied()
                    .filter(|&p| self.patch(p).data.bounds().intersects(bounds)),
            );
        }
        selected
    }

    /// Reconciles the layer's view list with the current selection.
    ///
    /// Removed patches are dropped from both view lists. Added patches are
    /// appended to `patches_in_view` only; the caller decides whether to
    /// show them or request a load. Running this twice with the same
    /// arguments returns an empty update the second time.
    pub fn update_patches(
        &mut self,
        layer: LayerId,
        site: SiteId,
        level: usize,
        bounds: &Bounds,
    ) -> ViewUpdate {
        let selected = self.select_patches(layer, site, level, bounds);
        let data_layer = &mut self.layers[layer.index()];

        let removed: Vec<PatchId> = data_layer
            .patches_in_view
            .iter()
            .copied()
            .filter(|p| !selected.contains(p))
            .collect();
        for &patch in &removed {
            data_layer.remove_from_view(patch);
        }

        let added: Vec<PatchId> = selected
            .into_iter()
            .filter(|p| !data_layer.patches_in_view.contains(p))
            .collect();
        data_layer.patches_in_view.extend(added.iter().copied());

        if !removed.is_empty() {
            self.update_visible_range(layer);
        }
        ViewUpdate { removed, added }
    }

    /// Takes every patch out of the layer's view.
    pub fn clear_view(&mut self, layer: LayerId) -> Vec<PatchId> {
        let data_layer = &mut self.layers[layer.index()];
        let removed = std::mem::take(&mut data_layer.patches_in_view);
        data_layer.loaded_patches_in_view.clear();
        data_layer.reset_visible_range();
        removed
    }

    /// True when the patch still belongs in the layer's view for the given
    /// level and rectangle.
    pub fn is_patch_in_view(&self, patch: PatchId, level: usize, bounds: &Bounds) -> bool {
        let p = self.patch(patch);
        p.level() == level
            && p.data.bounds().intersects(bounds)
            && self.layer(self.patch_layer(patch)).is_in_view(patch)
    }

    // =========================================================================
    // Value ranges and filters
    // =========================================================================

    /// Folds a newly shown patch into its layer site's running range and mean
    /// and the layer's visible range.
    pub fn update_value_ranges(&mut self, patch: PatchId) {
        let Some((min, max)) = self.patch(patch).data.value_range() else {
            return;
        };
        let layer_site = self.patch_layer_site(patch);
        self.layer_sites[layer_site.index()].fold_range(min, max);

        let mean = if matches!(self.patch(patch).data, PatchData::Grid(_)) {
            self.site_mean(layer_site)
        } else {
            1.0
        };
        self.layer_sites[layer_site.index()].mean = mean;

        let layer = self.layer_site(layer_site).layer;
        if !self.layer(layer).has_default_filters() {
            self.apply_site_filters(layer, layer_site);
        }
        self.layers[layer.index()].widen_visible_range(min, max);
    }

    /// Largest normalized mean among the loaded patches of a layer site.
    /// Invalid cells count as the site minimum.
    fn site_mean(&self, layer_site: LayerSiteId) -> f32 {
        let Some((site_min, site_max)) = self.layer_site(layer_site).value_range else {
            return 0.0;
        };
        let span = site_max - site_min;
        self.layer_site_patches(layer_site)
            .filter_map(|p| {
                let PatchData::Grid(grid) = &self.patch(p).data else {
                    return None;
                };
                let (sum, valid) = grid.value_sum()?;
                let cells = grid.cell_count();
                if cells == 0 {
                    return None;
                }
                let invalid = (cells - valid) as f64 * site_min as f64;
                let mean = ((sum + invalid) / cells as f64) as f32;
                Some(if span > 0.0 {
                    ((mean - site_min) / span).clamp(0.0, 1.0)
                } else {
                    0.0
                })
            })
            .fold(0.0, f32::max)
    }

    /// Recomputes the layer's visible range from its shown patches.
    pub fn update_visible_range(&mut self, layer: LayerId) {
        let ranges: Vec<(f32, f32)> = self
            .layer(layer)
            .loaded_patches_in_view
            .iter()
            .filter_map(|&p| self.patch(p).data.value_range())
            .collect();
        let data_layer = &mut self.layers[layer.index()];
        data_layer.reset_visible_range();
        for (min, max) in ranges {
            data_layer.widen_visible_range(min, max);
        }
    }

    /// Running value range of a layer for a site across all levels.
    pub fn site_min_max(&self, layer: LayerId, site: SiteId) -> Option<(f32, f32)> {
        self.layer_sites_of(layer, site)
            .into_iter()
            .filter_map(|ls| self.layer_site(ls).value_range)
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)))
    }

    /// Sets the normalized 0-1 filter of a layer and applies it to every
    /// loaded patch, mapped through each layer site's range.
    pub fn set_min_max_filters(&mut self, layer: LayerId, min: f32, max: f32) {
        let data_layer = &mut self.layers[layer.index()];
        data_layer.min_filter = min.clamp(0.0, 1.0);
        data_layer.max_filter = max.clamp(0.0, 1.0);

        let layer_sites: Vec<LayerSiteId> = self
            .layer(layer)
            .levels
            .iter()
            .flat_map(|level| level.layer_sites.iter().copied())
            .collect();
        for layer_site in layer_sites {
            self.apply_site_filters(layer, layer_site);
        }
    }

    fn apply_site_filters(&mut self, layer: LayerId, layer_site: LayerSiteId) {
        let ls = self.layer_site(layer_site);
        let data_layer = self.layer(layer);
        let (Some(site_min), Some(site_max)) =
            (ls.lerp(data_layer.min_filter), ls.lerp(data_layer.max_filter))
        else {
            return;
        };

        let patches: Vec<PatchId> = self.layer_site_patches(layer_site).collect();
        for patch in patches {
            match &mut self.patches[patch.index()].data {
                PatchData::Grid(grid) if grid.is_loaded() => {
                    grid.min_filter = site_min;
                    grid.max_filter = site_max;
                }
                PatchData::Point(points) if points.is_loaded() => {
                    points.min_filter = site_min;
                    points.max_filter = site_max;
                }
                PatchData::MultiGrid(multi) => {
                    for category in multi.categories.iter_mut() {
                        category.grid.min_filter = site_min;
                        category.grid.max_filter = site_max;
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GridData;

    fn grid_patch(name: &str, bounds: Bounds) -> (PatchFilename, PatchData) {
        let filename: PatchFilename = name.parse().unwrap();
        let grid = GridData::new(bounds, 2, 2);
        (filename, PatchData::Grid(grid))
    }

    fn catalog_with_patches() -> (Catalog, Vec<PatchId>) {
        let mut catalog = Catalog::new();
        let dir = PathBuf::from("/data/Site");
        let mut ids = Vec::new();
        for (name, bounds) in [
            ("pop_A_Site@0_2018_grid.bin", Bounds::new(0.0, 1.0, 1.0, 0.0)),
            ("pop_A_Site@1_2018_grid.bin", Bounds::new(1.0, 2.0, 1.0, 0.0)),
            ("pop_A_Site@0_2020_grid.bin", Bounds::new(0.0, 1.0, 1.0, 0.0)),
            ("pop_B_Site@0_2020_grid.bin", Bounds::new(0.0, 2.0, 1.0, 0.0)),
            ("pop_A_Other@0_2020_grid.bin", Bounds::new(0.0, 1.0, 1.0, 0.0)),
        ] {
            let (filename, data) = grid_patch(name, bounds);
            ids.push(catalog.add_patch(filename, dir.clone(), data).unwrap());
        }
        (catalog, ids)
    }

    #[test]
    fn test_add_patch_builds_hierarchy() {
        let (catalog, ids) = catalog_with_patches();
        assert_eq!(catalog.site_count(), 2);
        assert_eq!(catalog.layer_count(), 1);

        let site = catalog.site_by_name("SITE").unwrap();
        let layer = catalog.layer_by_name("pop").unwrap();
        assert_eq!(catalog.layer(layer).group, DEFAULT_GROUP);
        assert_eq!(catalog.layer_sites_of(layer, site).len(), 2);

        let layer_site = catalog.patch_layer_site(ids[0]);
        assert_eq!(catalog.layer_site(layer_site).records.len(), 2);
        assert_eq!(catalog.record(catalog.patch(ids[1]).record()).patches, vec![ids[0], ids[1]]);
        assert_eq!(catalog.patch_site(ids[4]), catalog.site_by_name("Other").unwrap());
    }

    #[test]
    fn test_invalid_level_is_skipped() {
        let mut catalog = Catalog::new();
        let (filename, data) = grid_patch("pop_F_Site@0_2018_grid.bin", Bounds::new(0.0, 1.0, 1.0, 0.0));
        assert!(catalog.add_patch(filename, PathBuf::from("/data"), data).is_none());
        assert_eq!(catalog.patch_count(), 0);
    }

    #[test]
    fn test_duplicate_site_name() {
        let mut catalog = Catalog::new();
        catalog.add_site("Delft", PathBuf::from("/a")).unwrap();
        assert!(matches!(
            catalog.add_site("delft", PathBuf::from("/b")),
            Err(ModelError::DuplicateSite(_))
        ));
    }

    #[test]
    fn test_site_bounds_union() {
        let (mut catalog, _) = catalog_with_patches();
        let site = catalog.site_by_name("Site").unwrap();
        assert_eq!(catalog.site_bounds(site), Bounds::new(0.0, 2.0, 1.0, 0.0));
    }

    #[test]
    fn test_update_patches_latest_year() {
        let (mut catalog, ids) = catalog_with_patches();
        let layer = catalog.layer_by_name("pop").unwrap();
        let site = catalog.site_by_name("Site").unwrap();
        let view = Bounds::new(0.0, 2.0, 1.0, 0.0);

        let update = catalog.update_patches(layer, site, 0, &view);
        assert_eq!(update.added, vec![ids[2]]);
        assert!(update.removed.is_empty());

        // Second run is a no-op
        let again = catalog.update_patches(layer, site, 0, &view);
        assert!(again.is_empty());
        assert_eq!(catalog.layer(layer).patches_in_view(), &[ids[2]]);
    }

    #[test]
    fn test_update_patches_fixed_year_and_intersection() {
        let (mut catalog, ids) = catalog_with_patches();
        let layer = catalog.layer_by_name("pop").unwrap();
        let site = catalog.site_by_name("Site").unwrap();
        catalog.layer_mut(layer).visible_year = YearFilter::Fixed(2018);

        let update = catalog.update_patches(layer, site, 0, &Bounds::new(0.5, 1.5, 1.0, 0.0));
        assert_eq!(update.added, vec![ids[0], ids[1]]);

        // Touching edges do not intersect
        let update = catalog.update_patches(layer, site, 0, &Bounds::new(1.0, 1.5, 1.0, 0.0));
        assert_eq!(update.removed, vec![ids[0]]);
        assert!(update.added.is_empty());

        // A level change clears the view
        let update = catalog.update_patches(layer, site, 1, &Bounds::new(1.0, 1.5, 1.0, 0.0));
        assert_eq!(update.removed, vec![ids[1]]);
        assert!(update.added.is_empty());
    }

    #[test]
    fn test_update_patches_other_site() {
        let (mut catalog, ids) = catalog_with_patches();
        let layer = catalog.layer_by_name("pop").unwrap();
        let other = catalog.site_by_name("Other").unwrap();
        let update = catalog.update_patches(layer, other, 0, &Bounds::new(0.0, 1.0, 1.0, 0.0));
        assert_eq!(update.added, vec![ids[4]]);
    }

    #[test]
    fn test_value_ranges_and_filters() {
        let (mut catalog, ids) = catalog_with_patches();
        let layer = catalog.layer_by_name("pop").unwrap();
        let site = catalog.site_by_name("Site").unwrap();

        for (id, values) in [(ids[0], vec![0.0, 2.0, 4.0, 6.0]), (ids[2], vec![4.0, 6.0, 8.0, 10.0])] {
            if let PatchData::Grid(grid) = &mut catalog.patch_mut(id).data {
                assert!(grid.set_values(values, None));
            }
            catalog.layer_mut(layer).mark_shown(id);
            catalog.update_value_ranges(id);
        }

        assert_eq!(catalog.site_min_max(layer, site), Some((0.0, 10.0)));
        assert_eq!(catalog.layer(layer).visible_range(), Some((0.0, 10.0)));
        let ls = catalog.patch_layer_site(ids[2]);
        assert_eq!(catalog.layer_site(ls).mean, 0.7);

        catalog.set_min_max_filters(layer, 0.2, 0.5);
        if let PatchData::Grid(grid) = &catalog.patch(ids[0]).data {
            assert_eq!((grid.min_filter, grid.max_filter), (2.0, 5.0));
        }
    }
}
