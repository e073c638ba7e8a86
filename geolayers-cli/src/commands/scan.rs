//! `scan` - discover sites and patches under a data root.

use std::collections::BTreeMap;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use geolayers::config::LayerConfig;
use geolayers::discovery::{PatchScanner, ScanReport};
use geolayers::model::Catalog;

use crate::error::CliError;

#[derive(Debug, Default, Serialize)]
pub struct SiteSummary {
    pub name: String,
    /// Patch count per layer name.
    pub layers: BTreeMap<String, usize>,
    /// Years with data, across layers.
    pub years: Vec<i32>,
}

pub fn run(data_dir: &Path, budget: usize, json: bool) -> Result<(), CliError> {
    let (catalog, report) = scan(data_dir, budget)?;
    let sites = summarize(&catalog);

    if json {
        let text =
            serde_json::to_string_pretty(&sites).map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!(
        "{} sites, {} layers, {} patches ({} converted, {} skipped)",
        catalog.site_count(),
        catalog.layer_count(),
        catalog.patch_count(),
        report.converted,
        report.skipped
    );
    for site in &sites {
        let years: Vec<String> = site.years.iter().map(i32::to_string).collect();
        println!();
        println!("{}  [{}]", site.name, years.join(", "));
        for (layer, count) in &site.layers {
            println!("  {:<32} {:>6}", layer, count);
        }
    }
    Ok(())
}

/// Runs a full scan with a progress bar.
pub fn scan(data_dir: &Path, budget: usize) -> Result<(Catalog, ScanReport), CliError> {
    let mut catalog = Catalog::new();
    LayerConfig::load_from_dir(data_dir)?.apply(&mut catalog);

    let mut scanner = PatchScanner::new(data_dir)?;
    let progress = ProgressBar::new(scanner.remaining() as u64);
    progress.set_style(
        ProgressStyle::with_template("Scanning {bar:40} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    while !scanner.is_done() {
        let before = scanner.remaining();
        scanner.step(&mut catalog, budget);
        progress.inc((before - scanner.remaining()) as u64);
    }
    progress.finish_and_clear();
    Ok((catalog, scanner.report()))
}

pub fn summarize(catalog: &Catalog) -> Vec<SiteSummary> {
    let mut sites: Vec<SiteSummary> = catalog
        .site_ids()
        .map(|id| SiteSummary {
            name: catalog.site(id).name.clone(),
            ..Default::default()
        })
        .collect();

    for patch in catalog.patch_ids() {
        let site = &mut sites[catalog.patch_site(patch).index()];
        let layer = &catalog.layer(catalog.patch_layer(patch)).name;
        *site.layers.entry(layer.clone()).or_default() += 1;
        let year = catalog.patch(patch).year();
        if let Err(pos) = site.years.binary_search(&year) {
            site.years.insert(pos, year);
        }
    }
    sites.sort_by(|a, b| a.name.cmp(&b.name));
    sites
}
