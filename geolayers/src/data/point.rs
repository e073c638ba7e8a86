//! Point cloud payload.

use super::{remap_categories, Bounds, Coloring, Distribution, Metadata};
use crate::category::{default_filter_for, CategoryFilter, IntCategory};

/// Parallel coordinate and value arrays of a loaded point set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointSamples {
    pub lons: Vec<f64>,
    pub lats: Vec<f64>,
    pub values: Vec<f32>,
}

impl PointSamples {
    pub fn with_capacity(count: usize) -> Self {
        Self {
            lons: Vec::with_capacity(count),
            lats: Vec::with_capacity(count),
            values: Vec::with_capacity(count),
        }
    }

    pub fn push(&mut self, lon: f64, lat: f64, value: f32) {
        self.lons.push(lon);
        self.lats.push(lat);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An unordered set of `count` valued points. Every point is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct PointData {
    pub bounds: Bounds,
    pub metadata: Metadata,
    pub count: usize,
    pub samples: Option<PointSamples>,
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

impl Default for PointData {
    fn default() -> Self {
        Self {
            bounds: Bounds::default(),
            metadata: Metadata::default(),
            count: 0,
            samples: None,
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

impl PointData {
    /// Builds a loaded point set. `count` and the value range follow the samples.
    pub fn from_samples(bounds: Bounds, samples: PointSamples) -> Self {
        let mut data = Self {
            bounds,
            ..Self::default()
        };
        data.set_samples(samples);
        data
    }

    pub fn set_samples(&mut self, samples: PointSamples) {
        self.count = samples.len();
        self.samples = Some(samples);
        self.update_min_max();
        self.min_filter = self.min_value;
        self.max_filter = self.max_value;
    }

    pub fn is_loaded(&self) -> bool {
        self.samples.is_some()
    }

    pub fn unload(&mut self) {
        self.samples = None;
    }

    pub fn is_categorized(&self) -> bool {
        !self.categories.is_empty()
    }

    pub fn set_categories(&mut self, categories: Vec<IntCategory>) {
        self.category_filter = default_filter_for(&categories);
        self.categories = categories;
    }

    pub(crate) fn value_sum(&self) -> Option<(f64, usize)> {
        let samples = self.samples.as_ref()?;
        let sum = samples.values.iter().map(|v| *v as f64).sum();
        Some((sum, samples.len()))
    }

    pub fn update_min_max(&mut self) {
        let Some(samples) = &self.samples else {
            return;
        };
        let (min, max) = samples
            .values
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        if min <= max {
            self.min_value = min;
            self.max_value = max;
        }
    }

    pub fn update_distribution(&mut self, crop: bool) {
        let (min, max) = if crop {
            (self.min_filter, self.max_filter)
        } else {
            (self.min_value, self.max_value)
        };
        let categorized = self.is_categorized();
        self.distribution = match &self.samples {
            Some(s) => Distribution::compute(s.values.iter().copied(), min, max, categorized),
            None => Distribution::default(),
        };
    }

    /// Remaps raw values to dense category indices.
    pub fn remap_categories(&mut self, source: &str) {
        if self.categories.is_empty() {
            return;
        }
        if let Some(samples) = self.samples.as_mut() {
            remap_categories(&mut samples.values, None, &mut self.categories, source);
        }
        self.min_value = 0.0;
        self.max_value = self.categories.len() as f32 - 1.0;
        self.min_filter = self.min_value;
        self.max_filter = self.max_value;
        self.update_distribution(false);
    }
}
