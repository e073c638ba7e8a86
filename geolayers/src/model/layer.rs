use crate::category::Color;

use super::{LayerSiteId, PatchId, MAX_LEVELS};

/// Which year a layer shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YearFilter {
    /// The most recent record of every site.
    #[default]
    Latest,
    /// Only records of exactly this year.
    Fixed(i32),
}

impl YearFilter {
    /// Converts the legacy encoding where `-1` means latest.
    pub fn from_year(year: i32) -> Self {
        if year < 0 {
            YearFilter::Latest
        } else {
            YearFilter::Fixed(year)
        }
    }
}

/// Layer sites holding data at one zoom tier.
#[derive(Debug, Clone, Default)]
pub struct LayerLevel {
    pub layer_sites: Vec<LayerSiteId>,
}

/// A named data layer, e.g. population density or the road network.
#[derive(Debug, Clone)]
pub struct DataLayer {
    pub name: String,
    pub color: Color,
    pub group: String,
    pub levels: [LayerLevel; MAX_LEVELS],
    pub visible_year: YearFilter,

    /// Normalized 0-1 filter applied to every site's value range.
    pub(crate) min_filter: f32,
    pub(crate) max_filter: f32,
    pub(crate) user_opacity: f32,
    pub(crate) tool_opacity: f32,

    /// Spatially matching patches, loaded or not.
    pub(crate) patches_in_view: Vec<PatchId>,
    /// Subset of `patches_in_view` that is loaded and shown.
    pub(crate) loaded_patches_in_view: Vec<PatchId>,

    pub(crate) min_visible_value: f32,
    pub(crate) max_visible_value: f32,
}

impl DataLayer {
    pub fn new(name: impl Into<String>, color: Color, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color,
            group: group.into(),
            levels: Default::default(),
            visible_year: YearFilter::Latest,
            min_filter: 0.0,
            max_filter: 1.0,
            user_opacity: 1.0,
            tool_opacity: 1.0,
            patches_in_view: Vec::new(),
            loaded_patches_in_view: Vec::new(),
            min_visible_value: f32::MAX,
            max_visible_value: f32::MIN,
        }
    }

    pub fn min_filter(&self) -> f32 {
        self.min_filter
    }

    pub fn max_filter(&self) -> f32 {
        self.max_filter
    }

    pub fn has_default_filters(&self) -> bool {
        self.min_filter == 0.0 && self.max_filter == 1.0
    }

    pub fn user_opacity(&self) -> f32 {
        self.user_opacity
    }

    pub fn tool_opacity(&self) -> f32 {
        self.tool_opacity
    }

    /// Opacity patches of this layer are drawn with.
    pub fn opacity(&self) -> f32 {
        self.user_opacity * self.tool_opacity
    }

    /// Sets the user opacity and returns the resulting opacity.
    pub fn set_user_opacity(&mut self, opacity: f32) -> f32 {
        self.user_opacity = opacity.clamp(0.0, 1.0);
        self.opacity()
    }

    /// Sets the tool opacity and returns the resulting opacity.
    pub fn set_tool_opacity(&mut self, opacity: f32) -> f32 {
        self.tool_opacity = opacity.clamp(0.0, 1.0);
        self.opacity()
    }

    pub fn patches_in_view(&self) -> &[PatchId] {
        &self.patches_in_view
    }

    pub fn loaded_patches_in_view(&self) -> &[PatchId] {
        &self.loaded_patches_in_view
    }

    pub fn has_patches_in_view(&self) -> bool {
        !self.patches_in_view.is_empty()
    }

    pub fn is_in_view(&self, patch: PatchId) -> bool {
        self.patches_in_view.contains(&patch)
    }

    pub fn is_shown(&self, patch: PatchId) -> bool {
        self.loaded_patches_in_view.contains(&patch)
    }

    /// Range of values among shown patches, if any are shown.
    pub fn visible_range(&self) -> Option<(f32, f32)> {
        (self.min_visible_value <= self.max_visible_value)
            .then_some((self.min_visible_value, self.max_visible_value))
    }

    pub(crate) fn reset_visible_range(&mut self) {
        self.min_visible_value = f32::MAX;
        self.max_visible_value = f32::MIN;
    }

    pub(crate) fn widen_visible_range(&mut self, min: f32, max: f32) {
        self.min_visible_value = self.min_visible_value.min(min);
        self.max_visible_value = self.max_visible_value.max(max);
    }

    pub(crate) fn remove_from_view(&mut self, patch: PatchId) -> bool {
        let before = self.patches_in_view.len();
        self.patches_in_view.retain(|&p| p != patch);
        self.loaded_patches_in_view.retain(|&p| p != patch);
        before != self.patches_in_view.len()
    }

    pub(crate) fn mark_shown(&mut self, patch: PatchId) {
        if !self.patches_in_view.contains(&patch) {
            self.patches_in_view.push(patch);
        }
        if !self.loaded_patches_in_view.contains(&patch) {
            self.loaded_patches_in_view.push(patch);
        }
    }

    pub(crate) fn mark_hidden(&mut self, patch: PatchId) -> bool {
        let before = self.loaded_patches_in_view.len();
        self.loaded_patches_in_view.retain(|&p| p != patch);
        before != self.loaded_patches_in_view.len()
    }
}
