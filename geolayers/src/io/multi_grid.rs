//! Multi-grid codec.
//!
//! The CSV uses the grid vocabulary. `CATEGORIES` names the bundled grids
//! in column order and every sample row carries one value per category.
//!
//! Binary layout after the common header:
//!
//! ```text
//! metadata | coloring u8 | countX i32 | countY i32 | categories i32 | (name str, color u8[4]) * categories
//!                                                              <- header-only reads stop here
//! | (min f32, max f32, values f32[n], hasMask u8, mask u8[pad4(n)]) * categories
//! ```

use std::io::{BufRead, Read, Write};

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};

use super::binary::{self, read_count, write_count};
use super::csv::{self, CsvLines, GRID_TOKENS};
use super::grid::read_coloring;
use super::CodecError;
use crate::data::{padded_mask_len, GridData, MultiGridData};

pub fn read_csv<R: BufRead>(reader: R, source: &str) -> Result<MultiGridData, CodecError> {
    let mut lines = CsvLines::new(reader);
    let header = csv::read_header(&mut lines, GRID_TOKENS, source)?;

    let bounds = header.bounds()?;
    let count_x = header.count_x.ok_or(CodecError::MissingSection("Count X"))?;
    let count_y = header.count_y.ok_or(CodecError::MissingSection("Count Y"))?;
    let categories = header.colored_categories();
    if categories.is_empty() {
        return Err(CodecError::MissingSection("CATEGORIES"));
    }

    let expected = count_x * count_y;
    let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(expected); categories.len()];

    while let Some(line) = lines.next_line()? {
        let line_no = lines.line_number();
        let cells = csv::split_cells(&line);
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(csv::parse_cell(cells.get(i).copied(), line_no, "category value")?);
        }
    }

    let found = columns.first().map_or(0, Vec::len);
    if found != expected {
        return Err(CodecError::ValueCount { expected, found });
    }

    let mut multi = MultiGridData::new(bounds);
    multi.metadata = header.metadata.clone();
    multi.coloring = header.coloring;
    for (category, values) in categories.into_iter().zip(columns) {
        let mut grid = GridData::new(bounds, count_x, count_y);
        grid.units = header.units.clone();
        if !grid.set_values(values, None) {
            return Err(CodecError::invalid("category column does not match the grid size"));
        }
        grid.update_distribution(false);
        multi.push(category.name, grid, category.color);
    }
    Ok(multi)
}

pub fn write_csv<W: Write>(w: &mut W, multi: &MultiGridData) -> Result<(), CodecError> {
    if !multi.is_loaded() {
        return Err(CodecError::invalid("cannot export an unloaded multi-grid"));
    }
    let first = &multi.categories[0].grid;
    let categories: Vec<_> = multi
        .categories
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut category = crate::category::IntCategory::new(c.name.clone(), i as i32);
            category.color = c.color;
            category
        })
        .collect();

    csv::write_common_header(
        w,
        &multi.bounds,
        &multi.metadata,
        &categories,
        multi.coloring,
        &first.units,
    )?;
    writeln!(w, "Count X,{}", first.count_x)?;
    writeln!(w, "Count Y,{}", first.count_y)?;
    writeln!(w, "VALUE,TRUE")?;

    let columns: Vec<&Vec<f32>> = multi
        .categories
        .iter()
        .filter_map(|c| c.grid.values.as_ref())
        .collect();
    for row in 0..first.cell_count() {
        let cells: Vec<String> = columns.iter().map(|c| c[row].to_string()).collect();
        writeln!(w, "{}", cells.join(","))?;
    }
    Ok(())
}

pub fn write_bin<W: Write>(w: &mut W, multi: &MultiGridData) -> Result<(), CodecError> {
    if !multi.is_loaded() {
        return Err(CodecError::invalid("cannot save an unloaded multi-grid"));
    }
    let (count_x, count_y) = multi
        .categories
        .first()
        .map_or((0, 0), |c| (c.grid.count_x, c.grid.count_y));

    binary::write_version(w)?;
    binary::write_bounds(w, &multi.bounds)?;
    binary::write_metadata(w, &multi.metadata)?;
    w.write_u8(multi.coloring as u8)?;
    write_count(w, count_x)?;
    write_count(w, count_y)?;
    write_count(w, multi.categories.len())?;
    for category in &multi.categories {
        binary::write_string(w, &category.name)?;
        binary::write_color(w, category.color)?;
    }

    for category in &multi.categories {
        let grid = &category.grid;
        if grid.count_x != count_x || grid.count_y != count_y {
            return Err(CodecError::invalid(format!(
                "category '{}' has a different resolution",
                category.name
            )));
        }
        w.write_f32::<LE>(grid.min_value)?;
        w.write_f32::<LE>(grid.max_value)?;
        binary::write_f32_array(w, grid.values.as_deref().unwrap_or_default())?;
        binary::write_bool(w, grid.mask.is_some())?;
        if let Some(mask) = &grid.mask {
            binary::write_u8_array(w, mask)?;
        }
    }
    Ok(())
}

/// Reads bounds, properties and category names. Category grids are unloaded.
pub fn read_bin_header<R: Read>(r: &mut R) -> Result<MultiGridData, CodecError> {
    binary::read_version(r)?;
    let bounds = binary::read_bounds(r)?;

    let mut multi = MultiGridData::new(bounds);
    multi.metadata = binary::read_metadata(r)?;
    multi.coloring = read_coloring(r)?;
    let count_x = read_count(r)?;
    let count_y = read_count(r)?;
    let categories = read_count(r)?;
    for _ in 0..categories {
        let name = binary::read_string(r)?;
        let color = binary::read_color(r)?;
        multi.push(name, GridData::new(bounds, count_x, count_y), color);
    }
    Ok(multi)
}

pub fn read_bin<R: Read>(r: &mut R) -> Result<MultiGridData, CodecError> {
    let mut multi = read_bin_header(r)?;
    for category in &mut multi.categories {
        let grid = &mut category.grid;
        let count = grid.cell_count();
        grid.min_value = r.read_f32::<LE>()?;
        grid.max_value = r.read_f32::<LE>()?;
        grid.reset_filters();
        grid.values = Some(binary::read_f32_array(r, count)?);
        if binary::read_bool(r)? {
            grid.mask = Some(binary::read_u8_array(r, padded_mask_len(count))?);
        }
        grid.update_distribution(false);
    }
    Ok(multi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Color;
    use std::io::Cursor;

    const LANDUSE: &str = "\
CATEGORIES,TRUE
Residential,0
Commercial,1
Colors,TRUE
Residential,#FFAA00
Commercial,#0000FF
West,0
East,2
North,1
South,0
Count X,2
Count Y,1
VALUE
0.25,0.75
0.5,0.5
";

    #[test]
    fn test_read_csv_columns() {
        let multi = read_csv(Cursor::new(LANDUSE), "landuse").unwrap();
        assert_eq!(multi.categories.len(), 2);
        let commercial = multi.category("Commercial").unwrap();
        assert_eq!(commercial.grid.values, Some(vec![0.75, 0.5]));
        assert_eq!(commercial.color, Color::from_rgb(0, 0, 255));
        assert_eq!(multi.value_range(), Some((0.25, 0.75)));
    }

    #[test]
    fn test_short_row_is_error() {
        let text = LANDUSE.replace("0.5,0.5", "0.5");
        assert!(matches!(
            read_csv(Cursor::new(text), "landuse"),
            Err(CodecError::Parse { .. })
        ));
    }

    #[test]
    fn test_binary_round_trip() {
        let multi = read_csv(Cursor::new(LANDUSE), "landuse").unwrap();
        let mut buf = Vec::new();
        write_bin(&mut buf, &multi).unwrap();

        let decoded = read_bin(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.bounds, multi.bounds);
        for (a, b) in decoded.categories.iter().zip(&multi.categories) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.color, b.color);
            assert_eq!(a.grid.values, b.grid.values);
        }

        let header = read_bin_header(&mut Cursor::new(&buf)).unwrap();
        assert!(!header.is_loaded());
        assert_eq!(header.categories.len(), 2);
    }
}
