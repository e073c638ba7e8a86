//! Grid codec.
//!
//! CSV sample rows are `value[,mask]`, one per cell, row-major from the
//! north-west corner. A missing mask column means valid.
//!
//! Binary layout after the common header:
//!
//! ```text
//! min f32 | max f32 | countX i32 | countY i32 | units str | coloring u8
//! | metadata | categories                       <- header-only reads stop here
//! | values f32[n] | hasMask u8 | mask u8[pad4(n)] | bins u32 | bin u32[bins] | maxBin u32
//! ```

use std::io::{BufRead, Read, Write};

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use super::binary::{self, read_count, write_count};
use super::csv::{self, CsvLines, GRID_TOKENS};
use super::CodecError;
use crate::category::default_filter_for;
use crate::data::{Bounds, Coloring, Distribution, GridData};

// =============================================================================
// CSV
// =============================================================================

pub fn read_csv<R: BufRead>(reader: R, source: &str) -> Result<GridData, CodecError> {
    let mut lines = CsvLines::new(reader);
    let header = csv::read_header(&mut lines, GRID_TOKENS, source)?;

    let bounds = header.bounds()?;
    let count_x = header.count_x.ok_or(CodecError::MissingSection("Count X"))?;
    let count_y = header.count_y.ok_or(CodecError::MissingSection("Count Y"))?;
    let expected = count_x * count_y;

    let mut values = Vec::with_capacity(expected);
    let mut mask = Vec::with_capacity(expected);
    let mut unmapped = 0usize;

    while let Some(line) = lines.next_line()? {
        let line_no = lines.line_number();
        let cells = csv::split_cells(&line);
        let raw: f32 = csv::parse_cell(cells.first().copied(), line_no, "value")?;
        let mut valid = match cells.get(1) {
            Some(m) if !m.is_empty() => csv::parse_cell::<i32>(Some(m), line_no, "mask")? == 1,
            _ => true,
        };

        let value = if header.name_to_value.is_some() && valid {
            match header.mapped_value(raw) {
                Some(v) => v,
                None => {
                    unmapped += 1;
                    valid = false;
                    raw
                }
            }
        } else {
            raw
        };

        values.push(value);
        mask.push(valid as u8);
    }

    if unmapped > 0 {
        warn!(file = source, count = unmapped, "Values without a NAMETOVALUE entry were masked");
    }
    if values.len() != expected {
        return Err(CodecError::ValueCount {
            expected,
            found: values.len(),
        });
    }

    let has_mask = mask.iter().any(|m| *m != 1);
    let mut grid = GridData::new(bounds, count_x, count_y);
    grid.metadata = header.metadata.clone();
    grid.units = header.units.clone();
    grid.coloring = header.coloring;
    grid.set_categories(header.colored_categories());
    if !grid.set_values(values, has_mask.then_some(mask)) {
        return Err(CodecError::invalid("grid sample arrays do not match the grid size"));
    }

    if grid.is_categorized() {
        grid.remap_categories(source);
    } else {
        grid.update_distribution(false);
    }

    Ok(grid)
}

pub fn write_csv<W: Write>(w: &mut W, grid: &GridData) -> Result<(), CodecError> {
    let values = grid
        .values
        .as_ref()
        .ok_or_else(|| CodecError::invalid("cannot export an unloaded grid"))?;
    csv::write_common_header(
        w,
        &grid.bounds,
        &grid.metadata,
        &grid.categories,
        grid.coloring,
        &grid.units,
    )?;
    writeln!(w, "Count X,{}", grid.count_x)?;
    writeln!(w, "Count Y,{}", grid.count_y)?;
    writeln!(w, "VALUE,TRUE")?;
    for (i, value) in values.iter().enumerate() {
        writeln!(w, "{},{}", value, grid.is_valid(i) as u8)?;
    }
    Ok(())
}

// =============================================================================
// Binary
// =============================================================================

pub fn write_bin<W: Write>(w: &mut W, grid: &GridData) -> Result<(), CodecError> {
    let values = grid
        .values
        .as_ref()
        .ok_or_else(|| CodecError::invalid("cannot save an unloaded grid"))?;

    binary::write_version(w)?;
    binary::write_bounds(w, &grid.bounds)?;
    write_properties(w, grid)?;

    binary::write_f32_array(w, values)?;
    binary::write_bool(w, grid.mask.is_some())?;
    if let Some(mask) = &grid.mask {
        binary::write_u8_array(w, mask)?;
    }

    write_count(w, grid.distribution.values.len())?;
    binary::write_u32_array(w, &grid.distribution.values)?;
    w.write_u32::<LE>(grid.distribution.max_count)?;
    Ok(())
}

/// Properties block shared with the multi-grid codec.
pub(crate) fn write_properties<W: Write>(w: &mut W, grid: &GridData) -> Result<(), CodecError> {
    w.write_f32::<LE>(grid.min_value)?;
    w.write_f32::<LE>(grid.max_value)?;
    write_count(w, grid.count_x)?;
    write_count(w, grid.count_y)?;
    binary::write_string(w, &grid.units)?;
    w.write_u8(grid.coloring as u8)?;
    binary::write_metadata(w, &grid.metadata)?;
    binary::write_categories(w, &grid.categories)?;
    Ok(())
}

pub(crate) fn read_properties<R: Read>(r: &mut R, bounds: Bounds) -> Result<GridData, CodecError> {
    let min_value = r.read_f32::<LE>()?;
    let max_value = r.read_f32::<LE>()?;
    let count_x = read_count(r)?;
    let count_y = read_count(r)?;
    let units = binary::read_string(r)?;
    let coloring = read_coloring(r)?;
    let metadata = binary::read_metadata(r)?;
    let categories = binary::read_categories(r)?;

    let mut grid = GridData::new(bounds, count_x, count_y);
    grid.min_value = min_value;
    grid.max_value = max_value;
    grid.reset_filters();
    grid.units = units;
    grid.coloring = coloring;
    grid.metadata = metadata;
    grid.category_filter = default_filter_for(&categories);
    grid.categories = categories;
    Ok(grid)
}

pub(crate) fn read_coloring<R: Read>(r: &mut R) -> Result<Coloring, CodecError> {
    let raw = r.read_u8()?;
    Coloring::from_u8(raw).ok_or_else(|| CodecError::invalid(format!("unknown coloring {}", raw)))
}

/// Reads bounds and properties only. The returned grid is unloaded.
pub fn read_bin_header<R: Read>(r: &mut R) -> Result<GridData, CodecError> {
    binary::read_version(r)?;
    let bounds = binary::read_bounds(r)?;
    read_properties(r, bounds)
}

pub fn read_bin<R: Read>(r: &mut R) -> Result<GridData, CodecError> {
    let mut grid = read_bin_header(r)?;
    let count = grid.cell_count();

    let values = binary::read_f32_array(r, count)?;
    let mask = if binary::read_bool(r)? {
        Some(binary::read_u8_array(r, crate::data::padded_mask_len(count))?)
    } else {
        None
    };
    grid.values = Some(values);
    grid.mask = mask;

    let bins = read_count(r)?;
    let bin_values = binary::read_u32_array(r, bins)?;
    let max_count = r.read_u32::<LE>()?;
    grid.distribution = Distribution {
        values: bin_values,
        max_count,
    };
    Ok(grid)
}
