//! Categories, category filters and display colors.
//!
//! A categorized grid stores small integer ids in its cells; each id maps to
//! an [`IntCategory`]. A [`CategoryFilter`] is a fixed 256-bit set that
//! selects which of those categories are currently visible.

use std::fmt;

use serde::Serialize;

/// Maximum number of categories a single filter can address.
pub const MAX_CATEGORIES: usize = 256;

const WORDS: usize = MAX_CATEGORIES / 32;

/// 256-bit visibility set over category indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoryFilter {
    bits: [u32; WORDS],
}

impl Default for CategoryFilter {
    /// All categories visible.
    fn default() -> Self {
        Self {
            bits: [u32::MAX; WORDS],
        }
    }
}

impl CategoryFilter {
    /// Filter with every category hidden.
    pub fn empty() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Returns true if `index` is selected. Out-of-range indices are never set.
    pub fn is_set(&self, index: usize) -> bool {
        if index >= MAX_CATEGORIES {
            return false;
        }
        self.bits[index / 32] & (1 << (index % 32)) != 0
    }

    /// Returns true if `index` is the only selected category.
    pub fn is_only_set(&self, index: usize) -> bool {
        if !self.is_set(index) {
            return false;
        }
        self.bits.iter().enumerate().all(|(word, bits)| {
            if word == index / 32 {
                *bits == 1 << (index % 32)
            } else {
                *bits == 0
            }
        })
    }

    pub fn set(&mut self, index: usize) {
        if index < MAX_CATEGORIES {
            self.bits[index / 32] |= 1 << (index % 32);
        }
    }

    pub fn remove(&mut self, index: usize) {
        if index < MAX_CATEGORIES {
            self.bits[index / 32] &= !(1 << (index % 32));
        }
    }

    pub fn remove_all(&mut self) {
        self.bits = [0; WORDS];
    }

    pub fn reset_to_default(&mut self) {
        *self = Self::default();
    }

    /// Returns true if every category is selected.
    pub fn is_default(&self) -> bool {
        self.bits.iter().all(|b| *b == u32::MAX)
    }

    /// Number of selected categories.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// An RGBA display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::from_rgb(255, 255, 255);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#RRGGBB`, `RRGGBB`, `#RRGGBBAA` or `RRGGBBAA`.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 && hex.len() != 8 {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        let a = if hex.len() == 8 { byte(6)? } else { 255 };
        Some(Self {
            r: byte(0)?,
            g: byte(2)?,
            b: byte(4)?,
            a,
        })
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(rgba: [u8; 4]) -> Self {
        Self {
            r: rgba[0],
            g: rgba[1],
            b: rgba[2],
            a: rgba[3],
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }
}

/// A named integer class that grid or point values can map to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntCategory {
    pub name: String,
    pub value: i32,
    pub color: Color,
}

impl IntCategory {
    pub fn new(name: impl Into<String>, value: i32) -> Self {
        Self {
            name: name.into(),
            value,
            color: Color::default(),
        }
    }

    /// A first category called "None" is hidden by default.
    pub fn is_none_category(&self) -> bool {
        self.name.eq_ignore_ascii_case("none")
    }
}

/// Default filter for a category table: everything selected except a leading "None".
pub fn default_filter_for(categories: &[IntCategory]) -> CategoryFilter {
    let mut filter = CategoryFilter::default();
    if categories.first().is_some_and(IntCategory::is_none_category) {
        filter.remove(0);
    }
    filter
}
