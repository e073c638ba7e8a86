//! Token-keyed CSV header parsing shared by the grid, point and multi-grid
//! codecs.
//!
//! A patch CSV is a list of `token,value` rows followed by a `VALUE` row,
//! after which every remaining line is a sample row. Tokens match
//! case-insensitively and ignoring spaces, so `Count X` and `countx` are the
//! same token. Section tokens (`METADATA`, `NAMETOVALUE`, `CATEGORIES`,
//! `Colors`) are followed by `TRUE` and own the rows below them up to the
//! next recognised token. Rows with an unknown token are logged and kept as
//! metadata.

use std::io::BufRead;

use tracing::{debug, warn};

use super::CodecError;
use crate::category::{Color, IntCategory, MAX_CATEGORIES};
use crate::data::{Bounds, Coloring, Metadata};

/// Header vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Metadata,
    NameToValue,
    Categories,
    Coloring,
    Colors,
    West,
    North,
    East,
    South,
    CountX,
    CountY,
    Count,
    Units,
    Values,
}

impl Token {
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Token::Metadata => &["metadata"],
            Token::NameToValue => &["nametovalue"],
            Token::Categories => &["categories"],
            Token::Coloring => &["coloring", "colouring"],
            Token::Colors => &["colors", "colours"],
            Token::West => &["west"],
            Token::North => &["north"],
            Token::East => &["east"],
            Token::South => &["south"],
            Token::CountX => &["countx"],
            Token::CountY => &["county"],
            Token::Count => &["count"],
            Token::Units => &["units"],
            Token::Values => &["value", "values"],
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Token::Metadata => "METADATA",
            Token::NameToValue => "NAMETOVALUE",
            Token::Categories => "CATEGORIES",
            Token::Coloring => "Coloring",
            Token::Colors => "Colors",
            Token::West => "West",
            Token::North => "North",
            Token::East => "East",
            Token::South => "South",
            Token::CountX => "Count X",
            Token::CountY => "Count Y",
            Token::Count => "Count",
            Token::Units => "Units",
            Token::Values => "VALUE",
        }
    }

    fn is_section(self) -> bool {
        matches!(
            self,
            Token::Metadata | Token::NameToValue | Token::Categories | Token::Colors
        )
    }

    /// Matches a cell against `vocabulary`, ignoring case and spaces.
    pub(crate) fn find(cell: &str, vocabulary: &[Token]) -> Option<Token> {
        let normalized: String = cell
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        vocabulary
            .iter()
            .copied()
            .find(|t| t.aliases().contains(&normalized.as_str()))
    }
}

/// Grid and multi-grid vocabulary.
pub(crate) const GRID_TOKENS: &[Token] = &[
    Token::Metadata,
    Token::NameToValue,
    Token::Categories,
    Token::Coloring,
    Token::Colors,
    Token::West,
    Token::North,
    Token::East,
    Token::South,
    Token::CountX,
    Token::CountY,
    Token::Units,
    Token::Values,
];

/// Point vocabulary.
pub(crate) const POINT_TOKENS: &[Token] = &[
    Token::Metadata,
    Token::NameToValue,
    Token::Categories,
    Token::Coloring,
    Token::Colors,
    Token::West,
    Token::North,
    Token::East,
    Token::South,
    Token::Count,
    Token::Units,
    Token::Values,
];

// =============================================================================
// Line reader
// =============================================================================

/// Line source with one line of push-back and 1-based line numbers.
pub(crate) struct CsvLines<R> {
    inner: std::io::Lines<R>,
    line: usize,
    pending: Option<String>,
}

impl<R: BufRead> CsvLines<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            inner: reader.lines(),
            line: 0,
            pending: None,
        }
    }

    /// Next non-blank line.
    pub(crate) fn next_line(&mut self) -> Result<Option<String>, CodecError> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        for line in self.inner.by_ref() {
            self.line += 1;
            let line = line?;
            let trimmed = line.trim_end_matches('\r');
            if !trimmed.trim().is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
        Ok(None)
    }

    pub(crate) fn push_back(&mut self, line: String) {
        self.pending = Some(line);
    }

    /// Number of the most recently read line.
    pub(crate) fn line_number(&self) -> usize {
        self.line
    }
}

pub(crate) fn split_cells(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

pub(crate) fn parse_cell<T: std::str::FromStr>(
    cell: Option<&str>,
    line: usize,
    what: &str,
) -> Result<T, CodecError> {
    let cell = cell.ok_or_else(|| CodecError::parse(line, format!("missing {}", what)))?;
    cell.parse()
        .map_err(|_| CodecError::parse(line, format!("invalid {} '{}'", what, cell)))
}

// =============================================================================
// Header
// =============================================================================

/// Everything a CSV header can carry, before kind-specific validation.
#[derive(Debug, Default)]
pub(crate) struct CsvHeader {
    pub west: Option<f64>,
    pub east: Option<f64>,
    pub north: Option<f64>,
    pub south: Option<f64>,
    pub count_x: Option<usize>,
    pub count_y: Option<usize>,
    pub count: Option<usize>,
    pub units: String,
    pub coloring: Coloring,
    pub metadata: Metadata,
    pub name_to_value: Option<Vec<f32>>,
    pub categories: Vec<IntCategory>,
    pub colors: Vec<Color>,
}

impl CsvHeader {
    pub(crate) fn bounds(&self) -> Result<Bounds, CodecError> {
        Ok(Bounds {
            west: self.west.ok_or(CodecError::MissingSection("West"))?,
            east: self.east.ok_or(CodecError::MissingSection("East"))?,
            north: self.north.ok_or(CodecError::MissingSection("North"))?,
            south: self.south.ok_or(CodecError::MissingSection("South"))?,
        })
    }

    /// Category table with custom colors applied in order.
    pub(crate) fn colored_categories(&self) -> Vec<IntCategory> {
        let mut categories = self.categories.clone();
        for (category, color) in categories.iter_mut().zip(&self.colors) {
            category.color = *color;
        }
        categories
    }

    /// Resolves a 1-based NAMETOVALUE id.
    pub(crate) fn mapped_value(&self, id: f32) -> Option<f32> {
        let table = self.name_to_value.as_ref()?;
        let index = id as i64 - 1;
        usize::try_from(index).ok().and_then(|i| table.get(i).copied())
    }
}

/// Reads header rows until the `VALUE` row. On return the next line of
/// `lines` is the first sample row.
pub(crate) fn read_header<R: BufRead>(
    lines: &mut CsvLines<R>,
    vocabulary: &[Token],
    source: &str,
) -> Result<CsvHeader, CodecError> {
    let mut header = CsvHeader::default();
    let mut seen: Vec<Token> = Vec::new();

    while let Some(line) = lines.next_line()? {
        let line_no = lines.line_number();
        let cells = split_cells(&line);
        let first = cells.first().copied().unwrap_or_default();
        let second = cells.get(1).copied();

        let Some(token) = Token::find(first, vocabulary) else {
            warn!(
                file = source,
                line = line_no,
                token = first,
                "Unrecognized header entry, keeping it as metadata"
            );
            if let Err(e) = header.metadata.add(first, second.unwrap_or_default()) {
                warn!(file = source, line = line_no, "{}", e);
            }
            continue;
        };

        if seen.contains(&token) {
            warn!(file = source, line = line_no, token = token.label(), "Duplicate header entry");
        }
        seen.push(token);

        if token.is_section() {
            let has_data = second.is_some_and(|s| s.eq_ignore_ascii_case("true"));
            if !has_data {
                debug!(file = source, token = token.label(), "Section marked empty");
                continue;
            }
        }

        match token {
            Token::Metadata => read_metadata_section(lines, vocabulary, &mut header.metadata, source)?,
            Token::NameToValue => {
                header.name_to_value = Some(read_name_to_value(lines, vocabulary)?);
            }
            Token::Categories => {
                header.categories = read_categories(lines, vocabulary, source)?;
            }
            Token::Colors => header.colors = read_colors(lines, vocabulary, source)?,
            Token::Coloring => {
                header.coloring = second.and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    warn!(file = source, line = line_no, "Unknown coloring, using Single");
                    Coloring::Single
                });
            }
            Token::West => header.west = Some(parse_cell(second, line_no, "west")?),
            Token::East => header.east = Some(parse_cell(second, line_no, "east")?),
            Token::North => header.north = Some(parse_cell(second, line_no, "north")?),
            Token::South => header.south = Some(parse_cell(second, line_no, "south")?),
            Token::CountX => header.count_x = Some(parse_cell(second, line_no, "count x")?),
            Token::CountY => header.count_y = Some(parse_cell(second, line_no, "count y")?),
            Token::Count => header.count = Some(parse_cell(second, line_no, "count")?),
            Token::Units => header.units = second.unwrap_or_default().to_string(),
            Token::Values => return Ok(header),
        }
    }

    Err(CodecError::MissingSection("VALUE"))
}

/// Reads section rows until the next known token, which is pushed back.
fn read_section_rows<R: BufRead>(
    lines: &mut CsvLines<R>,
    vocabulary: &[Token],
    mut row: impl FnMut(&[&str], usize) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    while let Some(line) = lines.next_line()? {
        let cells = split_cells(&line);
        if Token::find(cells[0], vocabulary).is_some() {
            lines.push_back(line);
            break;
        }
        row(&cells, lines.line_number())?;
    }
    Ok(())
}

fn read_metadata_section<R: BufRead>(
    lines: &mut CsvLines<R>,
    vocabulary: &[Token],
    metadata: &mut Metadata,
    source: &str,
) -> Result<(), CodecError> {
    read_section_rows(lines, vocabulary, |cells, line| {
        let value = cells[1..].join(",");
        if let Err(e) = metadata.add(cells[0], value) {
            warn!(file = source, line, "{}", e);
        }
        Ok(())
    })
}

fn read_name_to_value<R: BufRead>(
    lines: &mut CsvLines<R>,
    vocabulary: &[Token],
) -> Result<Vec<f32>, CodecError> {
    let mut values = Vec::new();
    read_section_rows(lines, vocabulary, |cells, line| {
        values.push(parse_cell(cells.get(1).copied(), line, "mapped value")?);
        Ok(())
    })?;
    Ok(values)
}

fn read_categories<R: BufRead>(
    lines: &mut CsvLines<R>,
    vocabulary: &[Token],
    source: &str,
) -> Result<Vec<IntCategory>, CodecError> {
    let mut categories = Vec::new();
    read_section_rows(lines, vocabulary, |cells, line| {
        let value: f32 = parse_cell(cells.get(1).copied(), line, "category value")?;
        let mut category = IntCategory::new(cells[0], value as i32);
        if let Some(color) = cells.get(2).and_then(|c| Color::parse_hex(c)) {
            category.color = color;
        }
        categories.push(category);
        Ok(())
    })?;
    if categories.len() > MAX_CATEGORIES {
        warn!(
            file = source,
            count = categories.len(),
            "More categories than a filter can address"
        );
    }
    Ok(categories)
}

fn read_colors<R: BufRead>(
    lines: &mut CsvLines<R>,
    vocabulary: &[Token],
    source: &str,
) -> Result<Vec<Color>, CodecError> {
    let mut colors = Vec::new();
    read_section_rows(lines, vocabulary, |cells, line| {
        let cell = cells.get(1).copied().unwrap_or(cells[0]);
        match Color::parse_hex(cell) {
            Some(color) => colors.push(color),
            None => {
                warn!(file = source, line, color = cell, "Invalid color, using white");
                colors.push(Color::WHITE);
            }
        }
        Ok(())
    })?;
    Ok(colors)
}

// =============================================================================
// Writing
// =============================================================================

/// Writes the header rows shared by every kind, up to but excluding the
/// count rows and `VALUE`.
pub(crate) fn write_common_header<W: std::io::Write>(
    w: &mut W,
    bounds: &Bounds,
    metadata: &Metadata,
    categories: &[IntCategory],
    coloring: Coloring,
    units: &str,
) -> Result<(), CodecError> {
    if !metadata.is_empty() {
        writeln!(w, "METADATA,TRUE")?;
        for (key, value) in metadata.iter() {
            writeln!(w, "{},{}", key, value)?;
        }
    }
    if !categories.is_empty() {
        writeln!(w, "CATEGORIES,TRUE")?;
        for category in categories {
            writeln!(w, "{},{},{}", category.name, category.value, category.color)?;
        }
    }
    writeln!(w, "Coloring,{:?}", coloring)?;
    writeln!(w, "West,{}", bounds.west)?;
    writeln!(w, "North,{}", bounds.north)?;
    writeln!(w, "East,{}", bounds.east)?;
    writeln!(w, "South,{}", bounds.south)?;
    if !units.is_empty() {
        writeln!(w, "Units,{}", units)?;
    }
    Ok(())
}
