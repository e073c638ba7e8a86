//! Value histograms used to draw distribution charts next to filter sliders.

use serde::Serialize;

/// Default number of bins for continuous value ranges.
pub const DEFAULT_BINS: usize = 50;

/// Histogram of sample values over `[min, max]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Distribution {
    pub values: Vec<u32>,
    pub max_count: u32,
}

impl Distribution {
    pub fn new(values: Vec<u32>) -> Self {
        let max_count = values.iter().copied().max().unwrap_or(0);
        Self { values, max_count }
    }

    /// Number of bins for a range: one per integer when the data is
    /// categorized or spans a small whole-number range, otherwise
    /// [`DEFAULT_BINS`].
    pub fn bin_count(min: f32, max: f32, categorized: bool) -> usize {
        if !(max >= min) {
            return 0;
        }
        let span = max - min;
        let integral = min.fract() == 0.0 && max.fract() == 0.0;
        if categorized || (integral && span < DEFAULT_BINS as f32) {
            span as usize + 1
        } else {
            DEFAULT_BINS
        }
    }

    /// Builds a histogram over `[min, max]`. Values outside the range are skipped.
    pub fn compute(
        samples: impl Iterator<Item = f32>,
        min: f32,
        max: f32,
        categorized: bool,
    ) -> Self {
        let bins = Self::bin_count(min, max, categorized);
        if bins == 0 {
            return Self::default();
        }

        let mut values = vec![0u32; bins];
        let span = max - min;
        let scale = if span > 0.0 {
            (bins as f32 - 1.0) / span
        } else {
            0.0
        };

        for value in samples {
            if value < min || value > max {
                continue;
            }
            let bin = (((value - min) * scale).round() as usize).min(bins - 1);
            values[bin] += 1;
        }

        Self::new(values)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
