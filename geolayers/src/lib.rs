//! geolayers - site/level/year versioned geospatial data layers
//!
//! The engine keeps a catalog of data patches found on disk and loads their
//! samples on demand as a map view moves around.
//!
//! # Architecture
//!
//! ```text
//! data root ──► discovery ──► model::Catalog ◄── manager::DataManager ──► EventBus
//!                  │ headers        ▲                   │
//!                  ▼                │ install           ▼ request
//!                 io  ◄──────── loader::ParseWorker ◄── loader::RequestTable
//!                                                       loader::PatchCache (LRU)
//! ```
//!
//! - [`io`] reads and writes the CSV and binary patch formats.
//! - [`data`] holds the in-memory patch kinds (grid, point, graph, multi-grid).
//! - [`model`] is the Site → DataLayer → LayerLevel → LayerSite → SiteRecord
//!   → Patch hierarchy, plus visibility selection and renames.
//! - [`loader`] runs loads on a background worker with an LRU cache of
//!   out-of-view patches.
//! - [`manager`] ties the pieces together for a consumer.
//!
//! # Example
//!
//! ```no_run
//! use geolayers::config::EngineConfig;
//! use geolayers::data::Bounds;
//! use geolayers::discovery::scan_data_dir;
//! use geolayers::manager::DataManager;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default().with_data_dir("/srv/sites");
//! let (catalog, _report) = scan_data_dir(&config.data_dir, config.scan_budget)?;
//!
//! let mut manager = DataManager::with_config(catalog, &config);
//! let site = manager.catalog().site_by_name("Amsterdam");
//! manager.set_active_site(site)?;
//! manager.set_view(0, Bounds::new(4.7, 5.1, 52.5, 52.2))?;
//! if let Some(layer) = manager.catalog().layer_by_name("population") {
//!     manager.show_layer(layer)?;
//! }
//! manager.wait_for_loads().await?;
//! # Ok(())
//! # }
//! ```

pub mod category;
pub mod config;
pub mod data;
pub mod discovery;
pub mod filename;
pub mod io;
pub mod loader;
pub mod logging;
pub mod manager;
pub mod model;
