//! Renames that keep filenames on disk in step with the catalog.
//!
//! In-memory names change first. Files are then moved one patch at a time,
//! CSV and BIN siblings together. A failed move is logged and the first
//! failure is returned, but the catalog keeps the new names and the
//! remaining files are still moved.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::filename::{is_valid_name, PatchFilename};
use crate::io::{self, PatchFormat};

use super::{Catalog, LayerId, LayerSiteId, ModelError, PatchId, RecordId, SiteId};

/// Pending file moves: patch, old stem, new stem.
type Moves = Vec<(PatchId, PathBuf, PathBuf)>;

impl Catalog {
    /// Renames a site and every patch file that belongs to it.
    pub fn rename_site(&mut self, site: SiteId, name: &str) -> Result<(), ModelError> {
        if !is_valid_name(name) {
            return Err(ModelError::InvalidName(name.to_string()));
        }
        let old = self.sites[site.index()].name.clone();
        let key = name.to_lowercase();
        if let Some(&existing) = self.site_index.get(&key) {
            if existing != site {
                return Err(ModelError::DuplicateSite(name.to_string()));
            }
        }

        info!(from = %old, to = name, "Renaming site");
        self.site_index.remove(&old.to_lowercase());
        self.site_index.insert(key, site);
        self.sites[site.index()].name = name.to_string();

        let patches: Vec<PatchId> = self
            .patch_ids()
            .filter(|&p| self.patch_site(p) == site)
            .collect();
        let moves = self.rewrite(&patches, |f| f.with_site(name), None);
        relocate_all(&moves)
    }

    /// Renames a layer and every patch file that belongs to it.
    pub fn rename_layer(&mut self, layer: LayerId, name: &str) -> Result<(), ModelError> {
        if !is_valid_name(name) {
            return Err(ModelError::InvalidName(name.to_string()));
        }
        let old = self.layers[layer.index()].name.clone();
        let key = name.to_lowercase();
        if let Some(&existing) = self.layer_index.get(&key) {
            if existing != layer {
                return Err(ModelError::DuplicateLayer(name.to_string()));
            }
        }

        info!(from = %old, to = name, "Renaming layer");
        self.layer_index.remove(&old.to_lowercase());
        self.layer_index.insert(key, layer);
        self.layers[layer.index()].name = name.to_string();

        let patches: Vec<PatchId> = self
            .patch_ids()
            .filter(|&p| self.patch_layer(p) == layer)
            .collect();
        let moves = self.rewrite(&patches, |f| f.with_layer(name), None);
        relocate_all(&moves)
    }

    /// Moves a layer's data at one level from its site to another site.
    /// Files are renamed and moved into the target site's folder.
    pub fn move_layer_site(
        &mut self,
        layer_site: LayerSiteId,
        target: SiteId,
    ) -> Result<(), ModelError> {
        let (layer, level, source) = {
            let ls = self.layer_site(layer_site);
            (ls.layer, ls.level, ls.site)
        };
        if source == target {
            return Ok(());
        }
        let taken = self.layer(layer).levels[level]
            .layer_sites
            .iter()
            .any(|&ls| self.layer_site(ls).site == target);
        if taken {
            return Err(ModelError::LayerSiteExists { level });
        }

        let target_name = self.site(target).name.clone();
        let target_dir = self.site(target).dir.clone();
        info!(
            layer = %self.layer(layer).name,
            from = %self.site(source).name,
            to = %target_name,
            level,
            "Moving layer data between sites"
        );

        self.layer_sites[layer_site.index()].site = target;
        let target_site = &mut self.sites[target.index()];
        if !target_site.has_layer(layer) {
            target_site.layers.push(layer);
        }
        target_site.bounds = None;

        let still_used = self.layer_sites_of(layer, source).iter().any(|&ls| ls != layer_site);
        let source_site = &mut self.sites[source.index()];
        if !still_used {
            source_site.layers.retain(|&l| l != layer);
        }
        source_site.bounds = None;

        let patches: Vec<PatchId> = self.layer_site_patches(layer_site).collect();
        let moves = self.rewrite(&patches, |f| f.with_site(&target_name), Some(&target_dir));
        relocate_all(&moves)
    }

    /// Moves a record to another year and renames its files.
    pub fn change_record_year(&mut self, record: RecordId, year: i32) -> Result<(), ModelError> {
        let layer_site = self.record(record).layer_site;
        let old_year = self.record(record).year;
        if old_year == year {
            return Ok(());
        }
        if self.layer_site(layer_site).records.contains_key(&year) {
            return Err(ModelError::YearTaken(year));
        }

        info!(record = %record, from = old_year, to = year, "Changing record year");
        let ls = &mut self.layer_sites[layer_site.index()];
        ls.records.remove(&old_year);
        ls.records.insert(year, record);
        self.records[record.index()].year = year;

        let patches = self.record(record).patches.clone();
        let moves = self.rewrite(&patches, |f| f.with_year(year), None);
        relocate_all(&moves)
    }

    /// Applies `rename` to each patch filename, optionally moving it to a new
    /// folder, and returns the file moves to perform.
    fn rewrite(
        &mut self,
        patches: &[PatchId],
        rename: impl Fn(&PatchFilename) -> PatchFilename,
        dir: Option<&Path>,
    ) -> Moves {
        let mut moves = Vec::with_capacity(patches.len());
        for &id in patches {
            let patch = &mut self.patches[id.index()];
            let from = patch.stem_path();
            patch.filename = rename(&patch.filename);
            if let Some(dir) = dir {
                patch.dir = dir.to_path_buf();
            }
            let to = patch.stem_path();
            if from != to {
                moves.push((id, from, to));
            }
        }
        moves
    }
}

fn relocate_all(moves: &Moves) -> Result<(), ModelError> {
    let mut first_error = None;
    for (patch, from, to) in moves {
        if let Err(e) = relocate(from, to) {
            error!(patch = %patch, error = %e, "Failed to move patch files");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Moves the CSV and BIN files of a patch stem, whichever exist.
pub(crate) fn relocate(from: &Path, to: &Path) -> Result<(), ModelError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|source| ModelError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    for format in [PatchFormat::Csv, PatchFormat::Bin] {
        let src = io::path_for(from, format);
        if !src.exists() {
            continue;
        }
        let dst = io::path_for(to, format);
        fs::rename(&src, &dst).map_err(|source| ModelError::Io {
            path: src.clone(),
            source,
        })?;
        debug!(from = %src.display(), to = %dst.display(), "Moved patch file");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Bounds, GridData, PatchData};

    fn add(catalog: &mut Catalog, dir: &Path, name: &str, touch: bool) -> PatchId {
        let filename: PatchFilename = name.parse().unwrap();
        if touch {
            fs::write(dir.join(name), "x").unwrap();
        }
        let data = PatchData::Grid(GridData::new(Bounds::new(0.0, 1.0, 1.0, 0.0), 1, 1));
        catalog.add_patch(filename, dir.to_path_buf(), data).unwrap()
    }

    #[test]
    fn test_rename_site_moves_both_siblings() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        let mut catalog = Catalog::new();
        add(&mut catalog, dir, "pop_A_Site@0_2018_grid.csv", true);
        fs::write(dir.join("pop_A_Site@0_2018_grid.bin"), "x").unwrap();
        add(&mut catalog, dir, "jobs_B_Site@0_2018_grid.bin", true);

        let site = catalog.site_by_name("Site").unwrap();
        catalog.rename_site(site, "Harbor").unwrap();

        assert_eq!(catalog.site(site).name, "Harbor");
        assert_eq!(catalog.site_by_name("harbor"), Some(site));
        assert_eq!(catalog.site_by_name("Site"), None);
        assert!(dir.join("pop_A_Harbor@0_2018_grid.csv").exists());
        assert!(dir.join("pop_A_Harbor@0_2018_grid.bin").exists());
        assert!(dir.join("jobs_B_Harbor@0_2018_grid.bin").exists());
        assert!(!dir.join("pop_A_Site@0_2018_grid.csv").exists());
    }

    #[test]
    fn test_rename_rejects_bad_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new();
        add(&mut catalog, temp_dir.path(), "pop_A_Site@0_2018_grid.bin", true);
        add(&mut catalog, temp_dir.path(), "pop_A_Other@0_2018_grid.bin", true);
        let site = catalog.site_by_name("Site").unwrap();

        assert!(matches!(
            catalog.rename_site(site, "bad_name"),
            Err(ModelError::InvalidName(_))
        ));
        assert!(matches!(
            catalog.rename_site(site, "OTHER"),
            Err(ModelError::DuplicateSite(_))
        ));
        // Changing only the case is allowed
        catalog.rename_site(site, "SITE").unwrap();
    }

    #[test]
    fn test_failed_move_keeps_new_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        let mut catalog = Catalog::new();
        let patch = add(&mut catalog, dir, "pop_A_Site@0_2018_grid.bin", true);
        let layer = catalog.layer_by_name("pop").unwrap();

        // A directory at the destination makes the rename fail
        fs::create_dir(dir.join("density_A_Site@0_2018_grid.bin")).unwrap();
        fs::write(dir.join("density_A_Site@0_2018_grid.bin").join("f"), "x").unwrap();

        let result = catalog.rename_layer(layer, "density");
        assert!(matches!(result, Err(ModelError::Io { .. })));
        assert_eq!(catalog.layer(layer).name, "density");
        assert_eq!(catalog.patch(patch).filename().layer, "density");
    }

    #[test]
    fn test_change_record_year() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        let mut catalog = Catalog::new();
        let a = add(&mut catalog, dir, "pop_A_Site@0_201806_grid.bin", true);
        add(&mut catalog, dir, "pop_A_Site@0_2020_grid.bin", true);
        let record = catalog.patch(a).record();

        assert!(matches!(
            catalog.change_record_year(record, 2020),
            Err(ModelError::YearTaken(2020))
        ));

        catalog.change_record_year(record, 2022).unwrap();
        let layer_site = catalog.patch_layer_site(a);
        assert_eq!(catalog.layer_site(layer_site).last_record(), Some(record));
        assert_eq!(catalog.record(record).year, 2022);
        assert!(dir.join("pop_A_Site@0_202206_grid.bin").exists());
    }

    #[test]
    fn test_move_layer_site() {
        let temp_dir = tempfile::tempdir().unwrap();
        let site_dir = temp_dir.path().join("Site");
        let other_dir = temp_dir.path().join("Other");
        fs::create_dir_all(&site_dir).unwrap();
        fs::create_dir_all(&other_dir).unwrap();

        let mut catalog = Catalog::new();
        let patch = add(&mut catalog, &site_dir, "pop_A_Site@0_2018_grid.bin", true);
        add(&mut catalog, &other_dir, "jobs_A_Other@0_2018_grid.bin", true);
        let layer = catalog.layer_by_name("pop").unwrap();
        let site = catalog.site_by_name("Site").unwrap();
        let other = catalog.site_by_name("Other").unwrap();

        let layer_site = catalog.patch_layer_site(patch);
        catalog.move_layer_site(layer_site, other).unwrap();

        assert_eq!(catalog.patch_site(patch), other);
        assert!(catalog.site(other).has_layer(layer));
        assert!(!catalog.site(site).has_layer(layer));
        assert!(other_dir.join("pop_A_Other@0_2018_grid.bin").exists());
        assert!(!site_dir.join("pop_A_Site@0_2018_grid.bin").exists());

        // The target now has pop at level A
        let back = catalog.add_patch(
            "pop_A_Site@1_2018_grid.bin".parse().unwrap(),
            site_dir.clone(),
            PatchData::Grid(GridData::new(Bounds::new(0.0, 1.0, 1.0, 0.0), 1, 1)),
        );
        let back_site = catalog.patch_layer_site(back.unwrap());
        assert!(matches!(
            catalog.move_layer_site(back_site, other),
            Err(ModelError::LayerSiteExists { level: 0 })
        ));
    }
}
