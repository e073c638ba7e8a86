//! Data manager: the foreground side of the engine.
//!
//! [`DataManager`] owns the [`Catalog`] and the load pipeline. Consumers drive
//! it with view changes (active site, level, bounds) and layer toggles, pump
//! completed loads with [`DataManager::process_outcomes`] or
//! [`DataManager::next_outcome`], and observe changes on the [`EventBus`].
//!
//! All mutation happens through `&mut self` on one task. The worker only ever
//! sees a [`ParseJob`] and hands back freshly loaded data, so no patch data is
//! shared across threads.

mod events;

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::data::{Bounds, PatchData};
use crate::loader::{
    Insertion, LoadStats, LoadStatsSnapshot, ParseJob, ParseOutcome, ParseWorker, PatchCache,
    RequestState, RequestTable, SubmitError,
};
use crate::model::{Catalog, LayerId, PatchId, SiteId, ViewUpdate, YearFilter};

pub use events::{DataEvent, EventBus, DEFAULT_EVENT_CAPACITY};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("parse worker is not running")]
    WorkerGone,

    #[error("no active site")]
    NoActiveSite,
}

/// Current map view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub level: usize,
    pub bounds: Bounds,
}

impl Default for View {
    fn default() -> Self {
        Self {
            level: 0,
            bounds: Bounds::inverted(),
        }
    }
}

pub struct DataManager {
    catalog: Catalog,
    requests: RequestTable,
    /// Jobs waiting for room in the worker queue.
    backlog: VecDeque<ParseJob>,
    worker: ParseWorker,
    outcomes: mpsc::UnboundedReceiver<ParseOutcome>,
    cache: PatchCache,
    events: EventBus,
    stats: Arc<LoadStats>,
    active_site: Option<SiteId>,
    view: View,
    /// Layers the consumer has switched on, in activation order.
    shown_layers: Vec<LayerId>,
}

impl DataManager {
    /// Creates a manager with default capacities. Must be called within a
    /// tokio runtime.
    pub fn new(catalog: Catalog) -> Self {
        Self::with_config(catalog, &EngineConfig::default())
    }

    pub fn with_config(catalog: Catalog, config: &EngineConfig) -> Self {
        let stats = Arc::new(LoadStats::new());
        let (tx, outcomes) = mpsc::unbounded_channel();
        let worker = ParseWorker::spawn(config.parse_queue_capacity, tx, Arc::clone(&stats));
        info!(
            patches = catalog.patch_count(),
            cache_capacity = config.cache_capacity,
            queue_capacity = config.parse_queue_capacity,
            "Data manager started"
        );
        Self {
            catalog,
            requests: RequestTable::new(),
            backlog: VecDeque::new(),
            worker,
            outcomes,
            cache: PatchCache::new(config.cache_capacity),
            events: EventBus::default(),
            stats,
            active_site: None,
            view: View::default(),
            shown_layers: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Mutable catalog access for renames and edits. View lists should not be
    /// touched directly.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> LoadStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &PatchCache {
        &self.cache
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn active_site(&self) -> Option<SiteId> {
        self.active_site
    }

    pub fn shown_layers(&self) -> &[LayerId] {
        &self.shown_layers
    }

    /// Loads submitted and not yet finished, canceled ones included.
    pub fn loads_in_flight(&self) -> usize {
        self.requests.len()
    }

    // =========================================================================
    // View
    // =========================================================================

    /// Switches the active site. Every patch of the previous site is hidden
    /// before shown layers are refreshed for the new one.
    pub fn set_active_site(&mut self, site: Option<SiteId>) -> Result<(), ManagerError> {
        if site == self.active_site {
            return Ok(());
        }
        let previous = self.active_site;
        for layer in self.shown_layers.clone() {
            self.clear_layer_view(layer);
        }
        self.active_site = site;
        if let Some(id) = site {
            info!(site = %self.catalog.site(id).name, "Active site changed");
        }
        self.events.emit(DataEvent::SiteChanged {
            previous,
            current: site,
        });
        self.refresh_shown_layers()
    }

    /// Moves the map view and refreshes every shown layer.
    pub fn set_view(&mut self, level: usize, bounds: Bounds) -> Result<(), ManagerError> {
        self.view = View { level, bounds };
        self.refresh_shown_layers()
    }

    fn refresh_shown_layers(&mut self) -> Result<(), ManagerError> {
        if self.active_site.is_none() {
            return Ok(());
        }
        for layer in self.shown_layers.clone() {
            self.update_patches(layer)?;
        }
        Ok(())
    }

    /// Switches a layer on for the current view.
    pub fn show_layer(&mut self, layer: LayerId) -> Result<ViewUpdate, ManagerError> {
        if !self.shown_layers.contains(&layer) {
            self.shown_layers.push(layer);
        }
        self.catalog.layer_mut(layer).reset_visible_range();
        self.update_patches(layer)
    }

    /// Switches a layer off and hides all its patches.
    pub fn hide_layer(&mut self, layer: LayerId) {
        self.shown_layers.retain(|&l| l != layer);
        self.clear_layer_view(layer);
    }

    /// Pins a layer to one year, or back to the latest, and refreshes it.
    pub fn set_visible_year(
        &mut self,
        layer: LayerId,
        year: YearFilter,
    ) -> Result<ViewUpdate, ManagerError> {
        self.catalog.layer_mut(layer).visible_year = year;
        if self.shown_layers.contains(&layer) && self.active_site.is_some() {
            self.update_patches(layer)
        } else {
            Ok(ViewUpdate::default())
        }
    }

    /// Runs the visibility pass for one layer against the active site and
    /// current view. Patches leaving the view are hidden; patches entering
    /// it are shown when loaded or requested otherwise. Idempotent.
    pub fn update_patches(&mut self, layer: LayerId) -> Result<ViewUpdate, ManagerError> {
        let site = self.active_site.ok_or(ManagerError::NoActiveSite)?;
        let View { level, bounds } = self.view;
        let update = self.catalog.update_patches(layer, site, level, &bounds);

        for &patch in &update.removed {
            self.hide_patch(patch);
        }
        for &patch in &update.added {
            if self.catalog.patch(patch).is_loaded() {
                self.show_patch(patch);
            } else if !self.requests.is_requesting(patch) {
                self.request_patch(patch)?;
            }
        }
        if !update.is_empty() {
            debug!(
                layer = %self.catalog.layer(layer).name,
                added = update.added.len(),
                removed = update.removed.len(),
                "Updated patches in view"
            );
        }
        Ok(update)
    }

    fn clear_layer_view(&mut self, layer: LayerId) {
        for patch in self.catalog.clear_view(layer) {
            self.hide_patch(patch);
        }
    }

    // =========================================================================
    // Show / hide
    // =========================================================================

    /// Draws a loaded patch: takes it out of the cache, folds its values into
    /// the ranges and notifies subscribers.
    pub fn show_patch(&mut self, patch: PatchId) {
        if !self.catalog.patch(patch).is_loaded() {
            error!(patch = %patch, "Cannot show a patch that is not loaded");
            return;
        }
        if self.cache.try_remove(patch) {
            self.stats.cache_hit();
        }

        // Graphs are drawn through their density grid
        self.catalog.patch_mut(patch).display_grid();
        self.catalog.update_value_ranges(patch);

        let layer = self.catalog.patch_layer(patch);
        self.catalog.layer_mut(layer).mark_shown(patch);
        let was_visible = std::mem::replace(&mut self.catalog.patch_mut(patch).visible, true);
        if !was_visible {
            self.events.emit(DataEvent::PatchVisibilityChanged {
                layer,
                patch,
                visible: true,
            });
        }
    }

    /// Stops drawing a patch. A pending load is canceled and loaded data is
    /// parked in the cache.
    pub fn hide_patch(&mut self, patch: PatchId) {
        self.cancel_request(patch);

        let layer = self.catalog.patch_layer(patch);
        self.catalog.layer_mut(layer).mark_hidden(patch);
        if self.catalog.patch(patch).is_loaded() {
            self.park(patch);
        }

        let was_visible = std::mem::replace(&mut self.catalog.patch_mut(patch).visible, false);
        if was_visible {
            self.events.emit(DataEvent::PatchVisibilityChanged {
                layer,
                patch,
                visible: false,
            });
        }
    }

    fn park(&mut self, patch: PatchId) {
        let evicted = self.cache.add(patch);
        if evicted.is_empty() {
            return;
        }
        for &id in &evicted {
            self.catalog.patch_mut(id).data.unload();
            debug!(patch = %id, "Evicted patch from cache");
        }
        self.stats.patches_evicted(evicted.len());
    }

    // =========================================================================
    // Requests
    // =========================================================================

    pub fn is_requesting(&self, patch: PatchId) -> bool {
        self.requests.is_requesting(patch)
    }

    /// Asks for a patch to be loaded. A second request while the first is
    /// pending is logged and ignored.
    pub fn request_patch(&mut self, patch: PatchId) -> Result<(), ManagerError> {
        if self.cache.try_remove(patch) {
            // Cached patches are loaded and should have been shown directly
            error!(patch = %patch, "Requested patch is already in the cache");
            self.stats.cache_hit();
            self.on_patch_loaded(patch);
            return Ok(());
        }

        if self.requests.insert(patch) == Insertion::New {
            let p = self.catalog.patch(patch);
            self.backlog.push_back(ParseJob {
                patch,
                kind: p.kind(),
                stem: p.stem_path(),
            });
            self.stats.request_submitted();
            self.pump()?;
        }
        self.emit_progress();
        Ok(())
    }

    /// Cancels a pending load. A job still waiting for the worker is dropped;
    /// one already handed over runs to completion and its data is cached.
    pub fn cancel_request(&mut self, patch: PatchId) {
        if !self.requests.is_requesting(patch) {
            return;
        }
        self.stats.load_canceled();
        if let Some(pos) = self.backlog.iter().position(|job| job.patch == patch) {
            self.backlog.remove(pos);
            self.requests.forget(patch);
            debug!(patch = %patch, "Dropped queued request");
        } else {
            self.requests.cancel(patch);
            debug!(patch = %patch, "Canceled in-flight request");
        }
        self.emit_progress();
    }

    /// Feeds backlog jobs to the worker while it has room.
    fn pump(&mut self) -> Result<(), ManagerError> {
        while let Some(job) = self.backlog.pop_front() {
            match self.worker.try_submit(job) {
                Ok(()) => {}
                Err(SubmitError::Full(job)) => {
                    self.backlog.push_front(job);
                    break;
                }
                Err(SubmitError::Closed(job)) => {
                    error!(patch = %job.patch, "Parse worker is gone");
                    self.requests.forget(job.patch);
                    for job in self.backlog.drain(..) {
                        self.requests.forget(job.patch);
                    }
                    return Err(ManagerError::WorkerGone);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Completions
    // =========================================================================

    /// Handles every finished load without waiting. Returns how many were
    /// handled.
    pub fn process_outcomes(&mut self) -> Result<usize, ManagerError> {
        let mut handled = 0;
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.handle_outcome(outcome)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Waits for the next finished load and handles it. Returns false when
    /// nothing is in flight.
    pub async fn next_outcome(&mut self) -> Result<bool, ManagerError> {
        if self.requests.is_empty() {
            return Ok(false);
        }
        match self.outcomes.recv().await {
            Some(outcome) => {
                self.handle_outcome(outcome)?;
                Ok(true)
            }
            None => Err(ManagerError::WorkerGone),
        }
    }

    /// Waits until every submitted load has finished.
    pub async fn wait_for_loads(&mut self) -> Result<(), ManagerError> {
        while self.next_outcome().await? {}
        Ok(())
    }

    fn handle_outcome(&mut self, outcome: ParseOutcome) -> Result<(), ManagerError> {
        let ParseOutcome { patch, result } = outcome;
        let state = self.requests.complete(patch);
        self.pump()?;

        match result {
            Ok((data, format)) => {
                self.install(patch, data);
                debug!(patch = %patch, ?format, ?state, "Patch loaded");
                match state {
                    Some(RequestState::Pending) => self.on_patch_loaded(patch),
                    Some(RequestState::Canceled) | None => self.park(patch),
                }
            }
            Err(e) => {
                if state == Some(RequestState::Pending) {
                    self.events.emit(DataEvent::PatchLoadFailed {
                        patch,
                        error: e.to_string(),
                    });
                }
            }
        }
        self.emit_progress();
        Ok(())
    }

    fn install(&mut self, patch: PatchId, data: PatchData) {
        let slot = &mut self.catalog.patch_mut(patch).data;
        if slot.kind() != data.kind() {
            warn!(patch = %patch, "Loaded data kind differs from header");
        }
        *slot = data;
    }

    /// Shows a freshly loaded patch if the view still wants it; otherwise
    /// takes it out of view and parks it.
    fn on_patch_loaded(&mut self, patch: PatchId) {
        self.events.emit(DataEvent::PatchLoaded { patch });
        let layer = self.catalog.patch_layer(patch);
        let View { level, bounds } = self.view;
        let wanted = self.shown_layers.contains(&layer)
            && self.active_site == Some(self.catalog.patch_site(patch))
            && self.catalog.is_patch_in_view(patch, level, &bounds);
        if wanted {
            self.show_patch(patch);
        } else {
            debug!(patch = %patch, "Loaded patch left the view");
            self.catalog.layer_mut(layer).remove_from_view(patch);
            self.catalog.update_visible_range(layer);
            self.park(patch);
        }
    }

    fn emit_progress(&mut self) {
        let (finished, total) = self.requests.progress();
        self.events
            .emit(DataEvent::LoadProgress { finished, total });
    }

    // =========================================================================
    // Filters and opacity
    // =========================================================================

    pub fn set_min_max_filters(&mut self, layer: LayerId, min: f32, max: f32) {
        self.catalog.set_min_max_filters(layer, min, max);
        let data_layer = self.catalog.layer(layer);
        self.events.emit(DataEvent::FilterChanged {
            layer,
            min: data_layer.min_filter(),
            max: data_layer.max_filter(),
        });
    }

    pub fn set_user_opacity(&mut self, layer: LayerId, opacity: f32) -> f32 {
        let opacity = self.catalog.layer_mut(layer).set_user_opacity(opacity);
        self.events.emit(DataEvent::OpacityChanged { layer, opacity });
        opacity
    }

    pub fn set_tool_opacity(&mut self, layer: LayerId, opacity: f32) -> f32 {
        let opacity = self.catalog.layer_mut(layer).set_tool_opacity(opacity);
        self.events.emit(DataEvent::OpacityChanged { layer, opacity });
        opacity
    }

    /// Hides everything, drops the cache and stops the worker.
    pub async fn shutdown(mut self) {
        for layer in self.shown_layers.clone() {
            self.hide_layer(layer);
        }
        for patch in self.cache.clear() {
            self.catalog.patch_mut(patch).data.unload();
        }
        self.worker.shutdown().await;
        info!("Data manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PatchKind;
    use crate::filename::PatchFilename;
    use crate::io;
    use std::fs;
    use std::path::Path;

    fn grid_csv(west: f64, value: f32) -> String {
        format!(
            "West,{}\nEast,{}\nNorth,1\nSouth,0\nCount X,1\nCount Y,1\nVALUE\n{},1\n",
            west,
            west + 1.0,
            value
        )
    }

    /// Writes a grid patch as CSV plus BIN and registers its header.
    fn add_grid(catalog: &mut Catalog, dir: &Path, name: &str, west: f64, value: f32) -> PatchId {
        let csv = dir.join(format!("{}.csv", name));
        fs::write(&csv, grid_csv(west, value)).unwrap();
        let bin = io::convert_csv(PatchKind::Grid, &csv).unwrap();
        let header = io::read_header(PatchKind::Grid, &bin).unwrap();
        let filename = PatchFilename::from_stem(name).unwrap();
        catalog.add_patch(filename, dir.to_path_buf(), header).unwrap()
    }

    fn fixture(dir: &Path) -> (Catalog, Vec<PatchId>) {
        let mut catalog = Catalog::new();
        let ids = (0..4)
            .map(|i| {
                add_grid(
                    &mut catalog,
                    dir,
                    &format!("pop_A_Site@{}_2018_grid", i),
                    i as f64,
                    i as f32 + 1.0,
                )
            })
            .collect();
        (catalog, ids)
    }

    fn drain(rx: &mut broadcast::Receiver<DataEvent>) -> Vec<DataEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn started(dir: &Path, cache_capacity: u64) -> (DataManager, Vec<PatchId>, LayerId) {
        let (catalog, ids) = fixture(dir);
        let config = EngineConfig::default().with_cache_capacity(cache_capacity);
        let mut manager = DataManager::with_config(catalog, &config);
        let site = manager.catalog().site_by_name("Site").unwrap();
        let layer = manager.catalog().layer_by_name("pop").unwrap();
        manager.set_active_site(Some(site)).unwrap();
        (manager, ids, layer)
    }

    #[tokio::test]
    async fn test_show_layer_loads_and_shows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut manager, ids, layer) = started(temp_dir.path(), 10).await;
        let mut rx = manager.subscribe();

        manager.set_view(0, Bounds::new(0.0, 2.0, 1.0, 0.0)).unwrap();
        let update = manager.show_layer(layer).unwrap();
        assert_eq!(update.added, vec![ids[0], ids[1]]);
        assert!(manager.is_requesting(ids[0]));

        // Same inputs again: no new requests
        let again = manager.update_patches(layer).unwrap();
        assert!(again.is_empty());
        assert_eq!(manager.stats().requested, 2);

        manager.wait_for_loads().await.unwrap();
        let data_layer = manager.catalog().layer(layer);
        assert_eq!(data_layer.loaded_patches_in_view(), &[ids[0], ids[1]]);
        assert_eq!(data_layer.visible_range(), Some((1.0, 2.0)));
        assert!(manager.catalog().patch(ids[0]).is_visible());

        let shown = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, DataEvent::PatchVisibilityChanged { visible: true, .. }))
            .count();
        assert_eq!(shown, 2);
    }

    #[tokio::test]
    async fn test_hidden_patches_go_to_cache_and_come_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut manager, ids, layer) = started(temp_dir.path(), 10).await;
        manager.set_view(0, Bounds::new(0.0, 1.0, 1.0, 0.0)).unwrap();
        manager.show_layer(layer).unwrap();
        manager.wait_for_loads().await.unwrap();

        manager.set_view(0, Bounds::new(3.0, 4.0, 1.0, 0.0)).unwrap();
        assert!(manager.cache().contains(ids[0]));
        assert!(!manager.catalog().patch(ids[0]).is_visible());
        assert!(manager.catalog().patch(ids[0]).is_loaded());

        // Re-entering shows from the cache without a load
        manager.wait_for_loads().await.unwrap();
        manager.set_view(0, Bounds::new(0.0, 1.0, 1.0, 0.0)).unwrap();
        assert!(!manager.cache().contains(ids[0]));
        assert!(manager.catalog().patch(ids[0]).is_visible());
        assert_eq!(manager.stats().requested, 2);
    }

    #[tokio::test]
    async fn test_eviction_unloads() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut manager, ids, layer) = started(temp_dir.path(), 1).await;
        manager.set_view(0, Bounds::new(0.0, 2.0, 1.0, 0.0)).unwrap();
        manager.show_layer(layer).unwrap();
        manager.wait_for_loads().await.unwrap();

        manager.hide_layer(layer);
        let loaded: Vec<bool> = ids[..2]
            .iter()
            .map(|&p| manager.catalog().patch(p).is_loaded())
            .collect();
        assert_eq!(loaded.iter().filter(|&&l| l).count(), 1);
        assert_eq!(manager.stats().evicted, 1);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_parks_result() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut manager, ids, layer) = started(temp_dir.path(), 10).await;
        manager.set_view(0, Bounds::new(0.0, 1.0, 1.0, 0.0)).unwrap();
        manager.show_layer(layer).unwrap();
        assert!(manager.is_requesting(ids[0]));

        // Leave the view before the load completes
        manager.set_view(0, Bounds::new(3.0, 4.0, 1.0, 0.0)).unwrap();
        assert!(!manager.is_requesting(ids[0]));

        manager.wait_for_loads().await.unwrap();
        assert!(manager.cache().contains(ids[0]));
        assert!(manager.catalog().patch(ids[0]).is_loaded());
        assert!(!manager.catalog().layer(layer).is_in_view(ids[0]));
        assert_eq!(manager.stats().canceled, 1);
    }

    #[tokio::test]
    async fn test_site_change_hides_previous() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut manager, ids, layer) = started(temp_dir.path(), 10).await;
        manager.set_view(0, Bounds::new(0.0, 1.0, 1.0, 0.0)).unwrap();
        manager.show_layer(layer).unwrap();
        manager.wait_for_loads().await.unwrap();
        let mut rx = manager.subscribe();

        manager.set_active_site(None).unwrap();
        assert!(!manager.catalog().patch(ids[0]).is_visible());
        assert!(!manager.catalog().layer(layer).has_patches_in_view());
        let events = drain(&mut rx);
        assert!(events.contains(&DataEvent::SiteChanged {
            previous: manager.catalog().site_by_name("Site"),
            current: None,
        }));
        assert!(matches!(
            manager.update_patches(layer),
            Err(ManagerError::NoActiveSite)
        ));
    }

    #[tokio::test]
    async fn test_failed_load_reports() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut manager, ids, layer) = started(temp_dir.path(), 10).await;
        fs::remove_file(temp_dir.path().join("pop_A_Site@0_2018_grid.bin")).unwrap();
        fs::remove_file(temp_dir.path().join("pop_A_Site@0_2018_grid.csv")).unwrap();
        let mut rx = manager.subscribe();

        manager.set_view(0, Bounds::new(0.0, 1.0, 1.0, 0.0)).unwrap();
        manager.show_layer(layer).unwrap();
        manager.wait_for_loads().await.unwrap();

        assert!(!manager.catalog().patch(ids[0]).is_loaded());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, DataEvent::PatchLoadFailed { patch, .. } if *patch == ids[0])));
        assert_eq!(manager.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_filters_and_opacity_emit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut manager, _, layer) = started(temp_dir.path(), 10).await;
        let mut rx = manager.subscribe();

        manager.set_min_max_filters(layer, 0.25, 0.75);
        assert_eq!(manager.set_user_opacity(layer, 0.5), 0.5);
        assert_eq!(manager.set_tool_opacity(layer, 0.5), 0.25);

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            DataEvent::FilterChanged {
                layer,
                min: 0.25,
                max: 0.75
            }
        );
        assert_eq!(events[2], DataEvent::OpacityChanged { layer, opacity: 0.25 });
    }
}
