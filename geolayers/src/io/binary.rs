//! Binary primitives shared by every patch kind.
//!
//! All values are little-endian. A file starts with an 8-byte token and
//! version pair followed by the patch bounds:
//!
//! ```text
//! +----------+----------+------+------+-------+-------+----------------+---------+
//! | token u32| vers. u32| W f64| E f64| N f64 | S f64 | properties ... | samples |
//! +----------+----------+------+------+-------+-------+----------------+---------+
//! ```
//!
//! Properties always precede samples so that a header read can stop early.
//! Sample arrays are written and read in chunks of at most
//! [`MAX_CHUNK_BYTES`].

use std::io::{Read, Write};

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};

use super::CodecError;
use crate::category::{Color, IntCategory};
use crate::data::{Bounds, Metadata};

/// Magic number at the start of every binary patch file.
pub const FILE_TOKEN: u32 = 0x600D_F00D;

/// Binary layout version. Readers accept this exact version only.
pub const FILE_VERSION: u32 = 13;

/// Upper bound for a single array read or write.
pub const MAX_CHUNK_BYTES: usize = 100 * 1024 * 1024;

/// Largest element count accepted from a file.
const MAX_ELEMENTS: usize = i32::MAX as usize;

// =============================================================================
// Header
// =============================================================================

pub fn write_version<W: Write>(w: &mut W) -> Result<(), CodecError> {
    w.write_u32::<LE>(FILE_TOKEN)?;
    w.write_u32::<LE>(FILE_VERSION)?;
    Ok(())
}

/// Reads and checks the token/version pair. Nothing past these 8 bytes is
/// consumed on failure.
pub fn read_version<R: Read>(r: &mut R) -> Result<(), CodecError> {
    let token = r.read_u32::<LE>()?;
    if token != FILE_TOKEN {
        return Err(CodecError::BadToken { found: token });
    }
    let version = r.read_u32::<LE>()?;
    if version != FILE_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: FILE_VERSION,
            found: version,
        });
    }
    Ok(())
}

pub fn write_bounds<W: Write>(w: &mut W, bounds: &Bounds) -> Result<(), CodecError> {
    w.write_f64::<LE>(bounds.west)?;
    w.write_f64::<LE>(bounds.east)?;
    w.write_f64::<LE>(bounds.north)?;
    w.write_f64::<LE>(bounds.south)?;
    Ok(())
}

pub fn read_bounds<R: Read>(r: &mut R) -> Result<Bounds, CodecError> {
    Ok(Bounds {
        west: r.read_f64::<LE>()?,
        east: r.read_f64::<LE>()?,
        north: r.read_f64::<LE>()?,
        south: r.read_f64::<LE>()?,
    })
}

// =============================================================================
// Scalars and strings
// =============================================================================

pub fn write_count<W: Write>(w: &mut W, count: usize) -> Result<(), CodecError> {
    let count = i32::try_from(count)
        .map_err(|_| CodecError::invalid(format!("count {} does not fit in i32", count)))?;
    w.write_i32::<LE>(count)?;
    Ok(())
}

pub fn read_count<R: Read>(r: &mut R) -> Result<usize, CodecError> {
    let count = r.read_i32::<LE>()?;
    usize::try_from(count).map_err(|_| CodecError::invalid(format!("negative count {}", count)))
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), CodecError> {
    write_count(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

pub fn read_string<R: Read>(r: &mut R) -> Result<String, CodecError> {
    let len = read_count(r)?;
    let bytes = read_u8_array(r, len)?;
    String::from_utf8(bytes).map_err(|e| CodecError::invalid(format!("string is not UTF-8: {}", e)))
}

pub fn write_bool<W: Write>(w: &mut W, value: bool) -> Result<(), CodecError> {
    w.write_u8(value as u8)?;
    Ok(())
}

pub fn read_bool<R: Read>(r: &mut R) -> Result<bool, CodecError> {
    Ok(r.read_u8()? != 0)
}

pub fn write_color<W: Write>(w: &mut W, color: Color) -> Result<(), CodecError> {
    w.write_all(&color.to_array())?;
    Ok(())
}

pub fn read_color<R: Read>(r: &mut R) -> Result<Color, CodecError> {
    let mut rgba = [0u8; 4];
    r.read_exact(&mut rgba)?;
    Ok(Color::from_array(rgba))
}

// =============================================================================
// Metadata and categories
// =============================================================================

pub fn write_metadata<W: Write>(w: &mut W, metadata: &Metadata) -> Result<(), CodecError> {
    write_count(w, metadata.len())?;
    for (key, value) in metadata.iter() {
        write_string(w, key)?;
        write_string(w, value)?;
    }
    Ok(())
}

pub fn read_metadata<R: Read>(r: &mut R) -> Result<Metadata, CodecError> {
    let count = read_count(r)?;
    let mut metadata = Metadata::new();
    for _ in 0..count {
        let key = read_string(r)?;
        let value = read_string(r)?;
        metadata
            .add(key, value)
            .map_err(|e| CodecError::invalid(e.to_string()))?;
    }
    Ok(metadata)
}

pub fn write_categories<W: Write>(w: &mut W, categories: &[IntCategory]) -> Result<(), CodecError> {
    write_count(w, categories.len())?;
    for category in categories {
        write_string(w, &category.name)?;
        w.write_i32::<LE>(category.value)?;
        write_color(w, category.color)?;
    }
    Ok(())
}

pub fn read_categories<R: Read>(r: &mut R) -> Result<Vec<IntCategory>, CodecError> {
    let count = read_count(r)?;
    let mut categories = Vec::with_capacity(count.min(crate::category::MAX_CATEGORIES));
    for _ in 0..count {
        let name = read_string(r)?;
        let value = r.read_i32::<LE>()?;
        let color = read_color(r)?;
        categories.push(IntCategory { name, value, color });
    }
    Ok(categories)
}

// =============================================================================
// Chunked arrays
// =============================================================================

fn chunk_elements(element_size: usize, chunk_bytes: usize) -> usize {
    (chunk_bytes / element_size).max(1)
}

fn check_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_ELEMENTS {
        return Err(CodecError::invalid(format!("array of {} elements is too large", len)));
    }
    Ok(())
}

/// Reads `len` elements, growing the buffer one chunk at a time.
///
/// A corrupt length over a short stream fails on the first missing chunk
/// instead of allocating the whole declared array up front.
fn read_chunks<T, F>(len: usize, chunk_len: usize, mut fill: F) -> Result<Vec<T>, CodecError>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> std::io::Result<()>,
{
    check_len(len)?;
    let mut values = Vec::with_capacity(len.min(chunk_len));
    while values.len() < len {
        let start = values.len();
        let end = start + (len - start).min(chunk_len);
        values.resize(end, T::default());
        fill(&mut values[start..end])?;
    }
    Ok(values)
}

pub fn write_f32_array<W: Write>(w: &mut W, values: &[f32]) -> Result<(), CodecError> {
    write_f32_array_chunked(w, values, MAX_CHUNK_BYTES)
}

pub(crate) fn write_f32_array_chunked<W: Write>(
    w: &mut W,
    values: &[f32],
    chunk_bytes: usize,
) -> Result<(), CodecError> {
    let mut buf = Vec::new();
    for chunk in values.chunks(chunk_elements(4, chunk_bytes)) {
        buf.clear();
        buf.reserve(chunk.len() * 4);
        for v in chunk {
            buf.write_f32::<LE>(*v)?;
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

pub fn read_f32_array<R: Read>(r: &mut R, len: usize) -> Result<Vec<f32>, CodecError> {
    read_f32_array_chunked(r, len, MAX_CHUNK_BYTES)
}

pub(crate) fn read_f32_array_chunked<R: Read>(
    r: &mut R,
    len: usize,
    chunk_bytes: usize,
) -> Result<Vec<f32>, CodecError> {
    read_chunks(len, chunk_elements(4, chunk_bytes), |chunk| r.read_f32_into::<LE>(chunk))
}

pub fn write_f64_array<W: Write>(w: &mut W, values: &[f64]) -> Result<(), CodecError> {
    let mut buf = Vec::new();
    for chunk in values.chunks(chunk_elements(8, MAX_CHUNK_BYTES)) {
        buf.clear();
        buf.reserve(chunk.len() * 8);
        for v in chunk {
            buf.write_f64::<LE>(*v)?;
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

pub fn read_f64_array<R: Read>(r: &mut R, len: usize) -> Result<Vec<f64>, CodecError> {
    read_chunks(len, chunk_elements(8, MAX_CHUNK_BYTES), |chunk| r.read_f64_into::<LE>(chunk))
}

pub fn write_u8_array<W: Write>(w: &mut W, values: &[u8]) -> Result<(), CodecError> {
    for chunk in values.chunks(MAX_CHUNK_BYTES) {
        w.write_all(chunk)?;
    }
    Ok(())
}

pub fn read_u8_array<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>, CodecError> {
    read_chunks(len, MAX_CHUNK_BYTES, |chunk| r.read_exact(chunk))
}

pub fn write_u32_array<W: Write>(w: &mut W, values: &[u32]) -> Result<(), CodecError> {
    for v in values {
        w.write_u32::<LE>(*v)?;
    }
    Ok(())
}

pub fn read_u32_array<R: Read>(r: &mut R, len: usize) -> Result<Vec<u32>, CodecError> {
    read_chunks(len, chunk_elements(4, MAX_CHUNK_BYTES), |chunk| r.read_u32_into::<LE>(chunk))
}
