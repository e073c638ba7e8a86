//! Point codec.
//!
//! CSV sample rows are `value,lon,lat`. Binary layout after the common
//! header:
//!
//! ```text
//! count i32 | min f32 | max f32 | units str | coloring u8 | metadata | categories
//! | lons f64[count] | lats f64[count] | values f32[count]
//! ```

use std::io::{BufRead, Read, Write};

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use super::binary::{self, read_count, write_count};
use super::csv::{self, CsvLines, POINT_TOKENS};
use super::grid::read_coloring;
use super::CodecError;
use crate::data::{PointData, PointSamples};

pub fn read_csv<R: BufRead>(reader: R, source: &str) -> Result<PointData, CodecError> {
    let mut lines = CsvLines::new(reader);
    let header = csv::read_header(&mut lines, POINT_TOKENS, source)?;

    let bounds = header.bounds()?;
    let declared = header.count.ok_or(CodecError::MissingSection("Count"))?;

    let mut samples = PointSamples::with_capacity(declared);
    let mut unmapped = 0usize;

    while let Some(line) = lines.next_line()? {
        let line_no = lines.line_number();
        let cells = csv::split_cells(&line);
        let raw: f32 = csv::parse_cell(cells.first().copied(), line_no, "value")?;
        let lon: f64 = csv::parse_cell(cells.get(1).copied(), line_no, "longitude")?;
        let lat: f64 = csv::parse_cell(cells.get(2).copied(), line_no, "latitude")?;

        let value = match header.name_to_value {
            Some(_) => header.mapped_value(raw).unwrap_or_else(|| {
                unmapped += 1;
                raw
            }),
            None => raw,
        };
        samples.push(lon, lat, value);
    }

    if unmapped > 0 {
        warn!(file = source, count = unmapped, "Values without a NAMETOVALUE entry");
    }
    if samples.len() != declared {
        warn!(
            file = source,
            declared,
            found = samples.len(),
            "Point count differs from header"
        );
    }

    let mut points = PointData::from_samples(bounds, samples);
    points.metadata = header.metadata.clone();
    points.units = header.units.clone();
    points.coloring = header.coloring;
    points.set_categories(header.colored_categories());

    if points.is_categorized() {
        points.remap_categories(source);
    } else {
        points.update_distribution(false);
    }

    Ok(points)
}

pub fn write_csv<W: Write>(w: &mut W, points: &PointData) -> Result<(), CodecError> {
    let samples = points
        .samples
        .as_ref()
        .ok_or_else(|| CodecError::invalid("cannot export unloaded points"))?;
    csv::write_common_header(
        w,
        &points.bounds,
        &points.metadata,
        &points.categories,
        points.coloring,
        &points.units,
    )?;
    writeln!(w, "Count,{}", samples.len())?;
    writeln!(w, "VALUE,TRUE")?;
    for i in 0..samples.len() {
        writeln!(w, "{},{},{}", samples.values[i], samples.lons[i], samples.lats[i])?;
    }
    Ok(())
}

pub fn write_bin<W: Write>(w: &mut W, points: &PointData) -> Result<(), CodecError> {
    let samples = points
        .samples
        .as_ref()
        .ok_or_else(|| CodecError::invalid("cannot save unloaded points"))?;

    binary::write_version(w)?;
    binary::write_bounds(w, &points.bounds)?;

    write_count(w, samples.len())?;
    w.write_f32::<LE>(points.min_value)?;
    w.write_f32::<LE>(points.max_value)?;
    binary::write_string(w, &points.units)?;
    w.write_u8(points.coloring as u8)?;
    binary::write_metadata(w, &points.metadata)?;
    binary::write_categories(w, &points.categories)?;

    binary::write_f64_array(w, &samples.lons)?;
    binary::write_f64_array(w, &samples.lats)?;
    binary::write_f32_array(w, &samples.values)?;
    Ok(())
}

/// Reads bounds and properties only. The returned point set is unloaded.
pub fn read_bin_header<R: Read>(r: &mut R) -> Result<PointData, CodecError> {
    binary::read_version(r)?;
    let bounds = binary::read_bounds(r)?;

    let mut points = PointData {
        bounds,
        ..PointData::default()
    };
    points.count = read_count(r)?;
    points.min_value = r.read_f32::<LE>()?;
    points.max_value = r.read_f32::<LE>()?;
    points.min_filter = points.min_value;
    points.max_filter = points.max_value;
    points.units = binary::read_string(r)?;
    points.coloring = read_coloring(r)?;
    points.metadata = binary::read_metadata(r)?;
    let categories = binary::read_categories(r)?;
    points.set_categories(categories);
    Ok(points)
}

pub fn read_bin<R: Read>(r: &mut R) -> Result<PointData, CodecError> {
    let mut points = read_bin_header(r)?;
    let count = points.count;
    let lons = binary::read_f64_array(r, count)?;
    let lats = binary::read_f64_array(r, count)?;
    let values = binary::read_f32_array(r, count)?;
    points.samples = Some(PointSamples { lons, lats, values });
    points.update_distribution(false);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Bounds;
    use std::io::Cursor;

    const POINTS: &str = "\
METADATA,TRUE
Source,Bus stops
West,103.6
East,104.1
North,1.5
South,1.2
Count,3
Units,people
VALUE
12,103.81,1.28
4,103.95,1.33
27,104.02,1.41
";

    #[test]
    fn test_read_csv() {
        let points = read_csv(Cursor::new(POINTS), "stops").unwrap();
        assert_eq!(points.count, 3);
        assert_eq!(points.min_value, 4.0);
        assert_eq!(points.max_value, 27.0);
        assert_eq!(points.units, "people");
        assert_eq!(points.metadata.get("source"), Some("Bus stops"));
        let samples = points.samples.as_ref().unwrap();
        assert_eq!(samples.lons[1], 103.95);
        assert_eq!(samples.lats[2], 1.41);
    }

    #[test]
    fn test_count_mismatch_uses_actual_rows() {
        let text = POINTS.replace("Count,3", "Count,5");
        let points = read_csv(Cursor::new(text), "stops").unwrap();
        assert_eq!(points.count, 3);
    }

    #[test]
    fn test_missing_coordinate_is_error() {
        let text = POINTS.replace("4,103.95,1.33", "4,103.95");
        assert!(matches!(
            read_csv(Cursor::new(text), "stops"),
            Err(CodecError::Parse { .. })
        ));
    }

    #[test]
    fn test_binary_round_trip() {
        let mut samples = PointSamples::default();
        samples.push(-0.1275, 51.5072, 3.5);
        samples.push(2.3522, 48.8566, -1.0);
        let mut points = PointData::from_samples(Bounds::new(-1.0, 3.0, 52.0, 48.0), samples);
        points.metadata.add("Date", "2019").unwrap();

        let mut buf = Vec::new();
        write_bin(&mut buf, &points).unwrap();
        let decoded = read_bin(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.samples, points.samples);
        assert_eq!(decoded.metadata, points.metadata);
        assert_eq!(decoded.bounds, points.bounds);

        let header = read_bin_header(&mut Cursor::new(&buf)).unwrap();
        assert!(!header.is_loaded());
        assert_eq!(header.count, 2);
    }
}
