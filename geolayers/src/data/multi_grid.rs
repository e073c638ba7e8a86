//! Bundle of per-category grids sharing one extent.

use super::{Bounds, Coloring, GridData, Metadata};
use crate::category::{CategoryFilter, Color};

/// One named layer of a [`MultiGridData`].
#[derive(Debug, Clone, PartialEq)]
pub struct GridCategory {
    pub name: String,
    pub grid: GridData,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiGridData {
    pub bounds: Bounds,
    pub metadata: Metadata,
    pub coloring: Coloring,
    pub categories: Vec<GridCategory>,
    /// Which categories are currently rendered.
    pub filter: CategoryFilter,
}

impl MultiGridData {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            ..Self::default()
        }
    }

    /// Adds a category grid. The grid takes the bundle's bounds.
    pub fn push(&mut self, name: impl Into<String>, mut grid: GridData, color: Color) {
        grid.bounds = self.bounds;
        self.categories.push(GridCategory {
            name: name.into(),
            grid,
            color,
        });
    }

    pub fn is_loaded(&self) -> bool {
        !self.categories.is_empty() && self.categories.iter().all(|c| c.grid.is_loaded())
    }

    pub fn unload(&mut self) {
        for category in &mut self.categories {
            category.grid.unload();
        }
    }

    pub fn category(&self, name: &str) -> Option<&GridCategory> {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Categories selected by the filter.
    pub fn visible(&self) -> impl Iterator<Item = &GridCategory> {
        self.categories
            .iter()
            .enumerate()
            .filter(|(i, _)| self.filter.is_set(*i))
            .map(|(_, c)| c)
    }

    /// Combined value range over every loaded category grid.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.categories
            .iter()
            .filter(|c| c.grid.is_loaded())
            .map(|c| (c.grid.min_value, c.grid.max_value))
            .reduce(|(lo, hi), (a, b)| (lo.min(a), hi.max(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> MultiGridData {
        let bounds = Bounds::new(0.0, 1.0, 1.0, 0.0);
        let mut multi = MultiGridData::new(bounds);
        let a = GridData::from_values(Bounds::default(), 1, 1, vec![2.0], None).unwrap();
        let b = GridData::from_values(Bounds::default(), 1, 1, vec![9.0], None).unwrap();
        multi.push("Residential", a, Color::from_rgb(255, 0, 0));
        multi.push("Commercial", b, Color::from_rgb(0, 0, 255));
        multi
    }

    #[test]
    fn test_push_shares_bounds() {
        let multi = bundle();
        assert_eq!(multi.categories[1].grid.bounds, multi.bounds);
        assert!(multi.category("commercial").is_some());
    }

    #[test]
    fn test_value_range_spans_categories() {
        assert_eq!(bundle().value_range(), Some((2.0, 9.0)));
    }

    #[test]
    fn test_filter_selects_visible() {
        let mut multi = bundle();
        multi.filter.remove(0);
        let names: Vec<_> = multi.visible().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Commercial"]);
    }

    #[test]
    fn test_unload_all_grids() {
        let mut multi = bundle();
        multi.unload();
        assert!(!multi.is_loaded());
        assert_eq!(multi.categories.len(), 2);
    }
}
