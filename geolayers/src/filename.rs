//! Patch filename grammar.
//!
//! Every patch file is named
//! `{layer}_{level}_{site}@{patch}_{yyyy[mm[dd]]}_{type}.{csv|bin}`:
//!
//! - `pop_A_Singapore@0_2018_grid.bin`
//! - `roads_C_Hanoi@3_201906_graph.csv`
//!
//! The level letter counts from `A` (level 0). The `@patch` component may be
//! omitted on input, in which case the patch index is 0; it is always written
//! on output. Layer and site names cannot contain `_` or `@`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

use crate::data::PatchKind;
use crate::io::PatchFormat;

/// Error parsing a patch filename.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("'{0}' does not match layer_level_site@patch_date_type.ext")]
    InvalidPattern(String),
    #[error("invalid level letter '{0}'")]
    InvalidLevel(char),
    #[error("invalid date '{0}'")]
    InvalidDate(String),
    #[error("unknown patch type '{0}'")]
    UnknownType(String),
    #[error("unknown extension '{0}'")]
    UnknownExtension(String),
}

/// Date component of a patch filename. Month and day are optional but a day
/// requires a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PatchDate {
    pub fn year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
        }
    }

    /// Moves the date to another year. February 29 becomes February 28
    /// when the target year is not a leap year.
    pub fn with_year(self, year: i32) -> Self {
        let day = match (self.month, self.day) {
            (Some(m), Some(d)) if NaiveDate::from_ymd_opt(year, m, d).is_none() => Some(d.min(28)),
            _ => self.day,
        };
        Self { year, day, ..self }
    }

    fn parse(year: &str, month: Option<&str>, day: Option<&str>) -> Result<Self, FilenameError> {
        let text = || format!("{}{}{}", year, month.unwrap_or(""), day.unwrap_or(""));
        let invalid = |_| FilenameError::InvalidDate(text());
        let date = PatchDate {
            year: year.parse().map_err(invalid)?,
            month: month.map(str::parse::<u32>).transpose().map_err(invalid)?,
            day: day.map(str::parse::<u32>).transpose().map_err(invalid)?,
        };
        let valid = match (date.month, date.day) {
            (None, _) => true,
            (Some(m), None) => (1..=12).contains(&m),
            (Some(m), Some(d)) => NaiveDate::from_ymd_opt(date.year, m, d).is_some(),
        };
        if valid {
            Ok(date)
        } else {
            Err(FilenameError::InvalidDate(text()))
        }
    }
}

impl fmt::Display for PatchDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "{:02}", month)?;
            if let Some(day) = self.day {
                write!(f, "{:02}", day)?;
            }
        }
        Ok(())
    }
}

/// Parsed patch filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchFilename {
    pub layer: String,
    pub level: u8,
    pub site: String,
    pub patch_index: u32,
    pub date: PatchDate,
    pub kind: PatchKind,
}

fn filename_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // layer _ level _ site [@patch] _ yyyy[mm[dd]] _ type . ext
            Regex::new(
                r"^([^_@]+)_([A-Za-z])_([^_@]+)(?:@(\d+))?_(\d{4})(\d{2})?(\d{2})?_([A-Za-z]+)\.([A-Za-z]+)$",
            )
            .ok()
        })
        .as_ref()
}

impl PatchFilename {
    /// Parses the final component of `path`.
    pub fn from_path(path: &Path) -> Result<Self, FilenameError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        name.parse()
    }

    /// Parses a name without extension, as returned by [`Self::stem`].
    pub fn from_stem(stem: &str) -> Result<Self, FilenameError> {
        Self::parse_with_format(&format!("{}.{}", stem, PatchFormat::Bin.extension()))
            .map(|(filename, _)| filename)
    }

    /// Parses `name`, returning the filename and its format.
    pub fn parse_with_format(name: &str) -> Result<(Self, PatchFormat), FilenameError> {
        let invalid = || FilenameError::InvalidPattern(name.to_string());
        let captures = filename_pattern()
            .and_then(|p| p.captures(name))
            .ok_or_else(invalid)?;
        let group = |i: usize| captures.get(i).map(|m| m.as_str());

        let letter = group(2).and_then(|s| s.chars().next()).ok_or_else(invalid)?;
        if !letter.is_ascii_uppercase() {
            return Err(FilenameError::InvalidLevel(letter));
        }

        let patch_index = match group(4) {
            Some(digits) => digits.parse().map_err(|_| invalid())?,
            None => 0,
        };

        let date = PatchDate::parse(group(5).ok_or_else(invalid)?, group(6), group(7))?;

        let type_name = group(8).ok_or_else(invalid)?;
        let kind = type_name
            .parse::<PatchKind>()
            .map_err(|_| FilenameError::UnknownType(type_name.to_string()))?;

        let extension = group(9).ok_or_else(invalid)?;
        let format = PatchFormat::from_path(Path::new(name))
            .ok_or_else(|| FilenameError::UnknownExtension(extension.to_string()))?;

        let filename = PatchFilename {
            layer: group(1).ok_or_else(invalid)?.to_string(),
            level: letter as u8 - b'A',
            site: group(3).ok_or_else(invalid)?.to_string(),
            patch_index,
            date,
            kind,
        };
        Ok((filename, format))
    }

    pub fn level_letter(&self) -> char {
        (b'A' + self.level) as char
    }

    /// Name without extension. Appending `.csv` or `.bin` gives a file name.
    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}@{}_{}_{}",
            self.layer,
            self.level_letter(),
            self.site,
            self.patch_index,
            self.date,
            self.kind.suffix()
        )
    }

    pub fn file_name(&self, format: PatchFormat) -> String {
        format!("{}.{}", self.stem(), format.extension())
    }

    /// Path of the stem inside `dir`.
    pub fn stem_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.stem())
    }

    pub fn with_layer(&self, layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
            ..self.clone()
        }
    }

    pub fn with_site(&self, site: &str) -> Self {
        Self {
            site: site.to_string(),
            ..self.clone()
        }
    }

    /// Replaces the year and keeps month and day, see [`PatchDate::with_year`].
    pub fn with_year(&self, year: i32) -> Self {
        Self {
            date: self.date.with_year(year),
            ..self.clone()
        }
    }
}

impl FromStr for PatchFilename {
    type Err = FilenameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_format(s).map(|(filename, _)| filename)
    }
}

impl fmt::Display for PatchFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// True when a layer or site name can be embedded in a filename.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['_', '@', '/', '\\', '.'])
}
