//! End-to-end tests: scan a data root on disk, drive the manager through
//! view changes and check what gets loaded, shown, cached and renamed.

use std::fs;
use std::path::Path;

use filetime::{set_file_mtime, FileTime};
use geolayers::config::EngineConfig;
use geolayers::data::{Bounds, PatchData};
use geolayers::discovery::scan_data_dir;
use geolayers::manager::{DataEvent, DataManager};
use geolayers::model::{LayerId, PatchId, YearFilter};

const VIEW: Bounds = Bounds {
    west: 4.0,
    east: 5.0,
    north: 52.5,
    south: 52.0,
};

fn grid_csv(value: f32) -> String {
    format!(
        "METADATA,TRUE\nSource,census\nWest,4.2\nEast,4.6\nNorth,52.4\nSouth,52.1\nCount X,2\nCount Y,1\nUnits,people\nVALUE\n{},1\n{},1\n",
        value,
        value * 2.0
    )
}

const ROADS: &str = "\
distance,source,target,x1,y1,x2,y2,classification
10,1,2,4.30,52.20,4.31,52.20,4
7,2,3,4.31,52.20,4.31,52.21,2
";

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn data_root(root: &Path) {
    write(
        &root.join("layers.csv"),
        "Type,Name,R,G,B\nGroup,Demographics,200,100,0\nLayer,pop,255,0,0\nGroup,Transport,0,0,0\nLayer,roads,0,0,255\n",
    );
    let site = root.join("Delft");
    write(&site.join("pop_A_Delft@0_2018_grid.csv"), &grid_csv(1.0));
    write(&site.join("pop_A_Delft@0_2020_grid.csv"), &grid_csv(5.0));
    write(&site.join("roads_A_Delft@0_2020_graph.csv"), ROADS);
    write(&root.join("_staging").join("pop_A_Junk@0_2018_grid.csv"), "garbage");
}

async fn start_manager(root: &Path, cache_capacity: u64) -> (DataManager, LayerId) {
    let config = EngineConfig::default()
        .with_data_dir(root)
        .with_cache_capacity(cache_capacity);
    let (catalog, report) = scan_data_dir(&config.data_dir, config.scan_budget).unwrap();
    assert_eq!(report.added, 3);

    let mut manager = DataManager::with_config(catalog, &config);
    let site = manager.catalog().site_by_name("Delft");
    manager.set_active_site(site).unwrap();
    manager.set_view(0, VIEW).unwrap();
    let pop = manager.catalog().layer_by_name("pop").unwrap();
    (manager, pop)
}

fn shown_years(manager: &DataManager, layer: LayerId) -> Vec<i32> {
    manager
        .catalog()
        .layer(layer)
        .loaded_patches_in_view()
        .iter()
        .map(|&p| manager.catalog().patch(p).year())
        .collect()
}

#[tokio::test]
async fn test_latest_year_is_shown_and_year_switch_uses_cache() {
    let temp_dir = tempfile::tempdir().unwrap();
    data_root(temp_dir.path());
    let (mut manager, pop) = start_manager(temp_dir.path(), 10).await;

    let layer = manager.catalog().layer(pop);
    assert_eq!(layer.group, "Demographics");

    manager.show_layer(pop).unwrap();
    manager.wait_for_loads().await.unwrap();
    assert_eq!(shown_years(&manager, pop), vec![2020]);
    assert_eq!(
        manager.catalog().layer(pop).visible_range(),
        Some((5.0, 10.0))
    );

    manager.set_visible_year(pop, YearFilter::Fixed(2018)).unwrap();
    manager.wait_for_loads().await.unwrap();
    assert_eq!(shown_years(&manager, pop), vec![2018]);

    // Back to latest: 2020 comes from the cache
    let requested = manager.stats().requested;
    manager.set_visible_year(pop, YearFilter::Latest).unwrap();
    assert_eq!(shown_years(&manager, pop), vec![2020]);
    assert_eq!(manager.stats().requested, requested);
    assert!(manager.stats().cache_hits >= 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_graph_is_drawn_through_density_grid() {
    let temp_dir = tempfile::tempdir().unwrap();
    data_root(temp_dir.path());
    let (mut manager, _) = start_manager(temp_dir.path(), 10).await;
    let roads = manager.catalog().layer_by_name("roads").unwrap();
    let mut events = manager.subscribe();

    manager.show_layer(roads).unwrap();
    manager.wait_for_loads().await.unwrap();

    let patch = manager.catalog().layer(roads).loaded_patches_in_view()[0];
    match &manager.catalog().patch(patch).data {
        PatchData::Graph(graph) => {
            let roads = graph
                .nodes
                .iter()
                .filter(|n| !n.classification.is_empty())
                .count();
            assert_eq!(roads, 3);
            // The fourth cell of the 2x2 raster is filled for off-road travel
            assert_eq!(graph.nodes.len(), 4);
            assert!(graph.has_density_grid());
        }
        other => panic!("expected a graph, got {:?}", other.kind()),
    }

    let mut loaded = false;
    while let Ok(event) = events.try_recv() {
        if event == (DataEvent::PatchLoaded { patch }) {
            loaded = true;
        }
    }
    assert!(loaded);
}

#[tokio::test]
async fn test_edited_csv_is_reparsed() {
    let temp_dir = tempfile::tempdir().unwrap();
    data_root(temp_dir.path());
    let site = temp_dir.path().join("Delft");
    let (mut manager, pop) = start_manager(temp_dir.path(), 10).await;

    // Scan wrote the binaries; now the CSV is edited after the fact
    let csv = site.join("pop_A_Delft@0_2020_grid.csv");
    let bin = site.join("pop_A_Delft@0_2020_grid.bin");
    fs::write(&csv, grid_csv(50.0)).unwrap();
    set_file_mtime(&bin, FileTime::from_unix_time(1_000, 0)).unwrap();
    set_file_mtime(&csv, FileTime::from_unix_time(2_000, 0)).unwrap();

    manager.show_layer(pop).unwrap();
    manager.wait_for_loads().await.unwrap();

    assert_eq!(manager.stats().csv_parsed, 1);
    assert_eq!(
        manager.catalog().layer(pop).visible_range(),
        Some((50.0, 100.0))
    );
}

#[tokio::test]
async fn test_renamed_site_still_loads() {
    let temp_dir = tempfile::tempdir().unwrap();
    data_root(temp_dir.path());
    let site_dir = temp_dir.path().join("Delft");
    let (mut manager, pop) = start_manager(temp_dir.path(), 10).await;

    let site = manager.catalog().site_by_name("Delft").unwrap();
    manager.catalog_mut().rename_site(site, "Leiden").unwrap();

    assert!(site_dir.join("pop_A_Leiden@0_2020_grid.csv").exists());
    assert!(site_dir.join("pop_A_Leiden@0_2020_grid.bin").exists());
    assert!(!site_dir.join("pop_A_Delft@0_2020_grid.bin").exists());
    assert_eq!(manager.catalog().site_by_name("Leiden"), Some(site));

    manager.show_layer(pop).unwrap();
    manager.wait_for_loads().await.unwrap();
    assert_eq!(shown_years(&manager, pop), vec![2020]);
    assert_eq!(manager.stats().failed, 0);
}

#[tokio::test]
async fn test_leaving_site_parks_and_evicts() {
    let temp_dir = tempfile::tempdir().unwrap();
    data_root(temp_dir.path());
    let (mut manager, pop) = start_manager(temp_dir.path(), 1).await;
    let roads = manager.catalog().layer_by_name("roads").unwrap();

    manager.show_layer(pop).unwrap();
    manager.show_layer(roads).unwrap();
    manager.wait_for_loads().await.unwrap();
    let shown: Vec<PatchId> = [pop, roads]
        .iter()
        .flat_map(|&l| manager.catalog().layer(l).loaded_patches_in_view().to_vec())
        .collect();
    assert_eq!(shown.len(), 2);

    manager.set_active_site(None).unwrap();
    let still_loaded = shown
        .iter()
        .filter(|&&p| manager.catalog().patch(p).is_loaded())
        .count();
    assert_eq!(still_loaded, 1);
    assert_eq!(manager.stats().evicted, 1);
    assert_eq!(manager.cache().len(), 1);
}
