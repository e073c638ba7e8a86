//! Entity hierarchy.
//!
//! ```text
//! Site ◄───────────────┐
//!                      │ site
//! DataLayer ─levels─► LayerLevel ─► LayerSite ─records─► SiteRecord ─► Patch ─► PatchData
//!     ▲                                 │                    ▲            │
//!     └──────────── layer ──────────────┘                    └─ record ───┘
//! ```
//!
//! Every entity lives in one arena owned by [`Catalog`] and is addressed by a
//! typed id. Downward edges are lists of ids; upward references are plain ids
//! with no ownership. Entities are created during discovery and live for the
//! session. Only the sample arrays inside each patch's [`PatchData`] come
//! and go.
//!
//! [`PatchData`]: crate::data::PatchData

mod catalog;
mod layer;
mod patch;
mod rename;
mod site;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub use catalog::{Catalog, ViewUpdate};
pub use layer::{DataLayer, LayerLevel, YearFilter};
pub use patch::Patch;
pub use site::{LayerSite, Site, SiteRecord};

/// Number of zoom tiers a layer can hold patches for.
pub const MAX_LEVELS: usize = 5;

/// Name of the group that receives layers not listed in the layer config.
pub const DEFAULT_GROUP: &str = "Other";

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

arena_id!(
    /// Index of a [`Site`].
    SiteId,
    "site#"
);
arena_id!(
    /// Index of a [`DataLayer`].
    LayerId,
    "layer#"
);
arena_id!(
    /// Index of a [`LayerSite`].
    LayerSiteId,
    "layersite#"
);
arena_id!(
    /// Index of a [`SiteRecord`].
    RecordId,
    "record#"
);
arena_id!(
    /// Index of a [`Patch`].
    PatchId,
    "patch#"
);

/// Errors from catalog mutations.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown site '{0}'")]
    UnknownSite(String),

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("a site named '{0}' already exists")]
    DuplicateSite(String),

    #[error("a layer named '{0}' already exists")]
    DuplicateLayer(String),

    #[error("'{0}' cannot be used in a patch filename")]
    InvalidName(String),

    #[error("site already has data for this layer at level {level}")]
    LayerSiteExists { level: usize },

    #[error("a record for year {0} already exists")]
    YearTaken(i32),

    #[error("failed to move {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
