//! Rectangular raster payload.

use std::str::FromStr;

use serde::Serialize;

use super::{remap_categories, Bounds, Distribution, Metadata};
use crate::category::{default_filter_for, CategoryFilter, IntCategory};

/// How a layer maps values to colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Coloring {
    #[default]
    Single = 0,
    ReverseSingle = 1,
    Multi = 2,
    ReverseMulti = 3,
    Custom = 4,
}

impl Coloring {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Coloring::Single),
            1 => Some(Coloring::ReverseSingle),
            2 => Some(Coloring::Multi),
            3 => Some(Coloring::ReverseMulti),
            4 => Some(Coloring::Custom),
            _ => None,
        }
    }
}

impl FromStr for Coloring {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Coloring::Single),
            "reversesingle" => Ok(Coloring::ReverseSingle),
            "multi" => Ok(Coloring::Multi),
            "reversemulti" => Ok(Coloring::ReverseMulti),
            "custom" => Ok(Coloring::Custom),
            _ => Err(()),
        }
    }
}

/// Length of a validity mask for `count` cells, padded to a multiple of 4.
pub(crate) fn padded_mask_len(count: usize) -> usize {
    (count + 3) & !3
}

/// A `count_x` by `count_y` raster of `f32` values.
///
/// Values are stored row-major from the north-west corner. The optional
/// mask holds one byte per cell (1 = valid) and is padded with zeros to a
/// multiple of 4 bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct GridData {
    pub bounds: Bounds,
    pub metadata: Metadata,
    pub count_x: usize,
    pub count_y: usize,
    pub values: Option<Vec<f32>>,
    pub mask: Option<Vec<u8>>,
    pub min_value: f32,
    pub max_value: f32,
    pub min_filter: f32,
    pub max_filter: f32,
    pub units: String,
    pub coloring: Coloring,
    pub categories: Vec<IntCategory>,
    pub category_filter: CategoryFilter,
    pub distribution: Distribution,
}

impl Default for GridData {
    fn default() -> Self {
        Self {
            bounds: Bounds::default(),
            metadata: Metadata::default(),
            count_x: 0,
            count_y: 0,
            values: None,
            mask: None,
            min_value: 0.0,
            max_value: 0.0,
            min_filter: 0.0,
            max_filter: 0.0,
            units: String::new(),
            coloring: Coloring::default(),
            categories: Vec::new(),
            category_filter: CategoryFilter::default(),
            distribution: Distribution::default(),
        }
    }
}

impl GridData {
    pub fn new(bounds: Bounds, count_x: usize, count_y: usize) -> Self {
        Self {
            bounds,
            count_x,
            count_y,
            ..Self::default()
        }
    }

    /// Builds a loaded grid and computes its value range.
    ///
    /// Returns `None` if `values` (or a mask shorter than the cell count)
    /// does not match `count_x * count_y`.
    pub fn from_values(
        bounds: Bounds,
        count_x: usize,
        count_y: usize,
        values: Vec<f32>,
        mask: Option<Vec<u8>>,
    ) -> Option<Self> {
        let mut grid = Self::new(bounds, count_x, count_y);
        grid.set_values(values, mask).then_some(grid)
    }

    /// Installs sample arrays, padding the mask as needed, and refreshes
    /// min/max and filters. Returns false on a length mismatch.
    pub fn set_values(&mut self, values: Vec<f32>, mask: Option<Vec<u8>>) -> bool {
        let count = self.cell_count();
        if values.len() != count {
            return false;
        }
        let mask = match mask {
            Some(mut m) if m.len() >= count => {
                m.resize(padded_mask_len(count), 0);
                Some(m)
            }
            Some(_) => return false,
            None => None,
        };
        self.values = Some(values);
        self.mask = mask;
        self.update_min_max();
        self.reset_filters();
        true
    }

    pub fn cell_count(&self) -> usize {
        self.count_x * self.count_y
    }

    pub fn is_loaded(&self) -> bool {
        self.values.is_some()
    }

    pub fn unload(&mut self) {
        self.values = None;
        self.mask = None;
    }

    pub fn is_categorized(&self) -> bool {
        !self.categories.is_empty()
    }

    /// Installs a category table and its default filter.
    pub fn set_categories(&mut self, categories: Vec<IntCategory>) {
        self.category_filter = default_filter_for(&categories);
        self.categories = categories;
    }

    pub fn index_of(&self, x: usize, y: usize) -> usize {
        y * self.count_x + x
    }

    pub fn is_valid(&self, index: usize) -> bool {
        match &self.mask {
            Some(mask) => mask.get(index).is_some_and(|m| *m != 0),
            None => index < self.cell_count(),
        }
    }

    /// Column and row of the cell containing a position.
    pub fn cell_at(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if !self.bounds.contains(lon, lat) || self.count_x == 0 || self.count_y == 0 {
            return None;
        }
        let fx = (lon - self.bounds.west) / self.bounds.width() * self.count_x as f64;
        let fy = (self.bounds.north - lat) / self.bounds.height() * self.count_y as f64;
        let x = (fx as usize).min(self.count_x - 1);
        let y = (fy as usize).min(self.count_y - 1);
        Some((x, y))
    }

    /// Value at a position, or `None` outside the grid, on masked cells,
    /// or when unloaded.
    pub fn value_at(&self, lon: f64, lat: f64) -> Option<f32> {
        let (x, y) = self.cell_at(lon, lat)?;
        let index = self.index_of(x, y);
        if !self.is_valid(index) {
            return None;
        }
        self.values.as_ref()?.get(index).copied()
    }

    /// Longitude of the center of column `x`.
    pub fn longitude_of(&self, x: usize) -> f64 {
        self.bounds.west + (x as f64 + 0.5) * self.bounds.width() / self.count_x as f64
    }

    /// Latitude of the center of row `y`.
    pub fn latitude_of(&self, y: usize) -> f64 {
        self.bounds.north - (y as f64 + 0.5) * self.bounds.height() / self.count_y as f64
    }

    /// Iterator over the valid loaded values.
    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values
            .iter()
            .flat_map(|v| v.iter().copied().enumerate())
            .filter(move |(i, _)| self.is_valid(*i))
            .map(|(_, v)| v)
    }

    pub(crate) fn value_sum(&self) -> Option<(f64, usize)> {
        self.values.as_ref()?;
        let (sum, count) = self
            .valid_values()
            .fold((0.0f64, 0usize), |(s, c), v| (s + v as f64, c + 1));
        Some((sum, count))
    }

    /// Recomputes min/max over valid cells. Leaves the range untouched if
    /// no cell is valid.
    pub fn update_min_max(&mut self) {
        let (min, max) = self
            .valid_values()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if min <= max {
            self.min_value = min;
            self.max_value = max;
        }
    }

    pub fn reset_filters(&mut self) {
        self.min_filter = self.min_value;
        self.max_filter = self.max_value;
    }

    /// Rebuilds the histogram. With `crop`, the range is the current
    /// min/max filter instead of the full value range.
    pub fn update_distribution(&mut self, crop: bool) {
        let (min, max) = if crop {
            (self.min_filter, self.max_filter)
        } else {
            (self.min_value, self.max_value)
        };
        let categorized = self.is_categorized();
        self.distribution = Distribution::compute(self.valid_values(), min, max, categorized);
    }

    /// Remaps raw values to dense category indices and refreshes range,
    /// filters and histogram.
    pub fn remap_categories(&mut self, source: &str) {
        if self.categories.is_empty() {
            return;
        }
        if let Some(values) = self.values.as_mut() {
            remap_categories(
                values,
                self.mask.as_deref(),
                &mut self.categories,
                source,
            );
        }
        self.min_value = 0.0;
        self.max_value = self.categories.len() as f32 - 1.0;
        self.reset_filters();
        self.update_distribution(false);
    }
}
