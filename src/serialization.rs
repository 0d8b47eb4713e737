use std::{fmt::Write, str::{FromStr, SplitWhitespace}};

use serde::{de::DeserializeOwned, Serialize};

use crate::{errors::SGError, storage::{BoundingBox, GridPoint, GridStorage}};

/// Version written by [`write_text`]. Versions 1 to 5 can be read.
pub const TEXT_VERSION: u32 = 3;

/// Newest text version [`read_text`] understands.
pub const MAX_TEXT_VERSION: u32 = 5;

/// Largest dimensionality accepted from a text header.
pub const MAX_TEXT_DIM: usize = 1 << 16;

/// Serialization format options for grid data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerializationFormat
{
    /// Whitespace separated text, see [`write_text`]. Only available for a bare storage.
    Text,
    /// bincode encoding of the serde representation.
    Bincode,
    /// bincode with LZ4 compression.
    #[default]
    BincodeLz4,
}

impl SerializationFormat
{
    /// Returns true if this format uses LZ4 compression
    pub fn is_compressed(&self) -> bool
    {
        matches!(self, SerializationFormat::BincodeLz4)
    }

    pub fn is_binary(&self) -> bool
    {
        !matches!(self, SerializationFormat::Text)
    }
}

///
/// Writes the text representation:
///
/// ```text
/// <version> <dim> <count>
/// <lower_0> <upper_0> <dirichlet_left_0> <dirichlet_right_0> ...
/// <dim> l_0 i_0 ... l_{dim-1} i_{dim-1}
/// <leaf>
/// ```
///
/// with one point per line pair in sequence order. Dirichlet flags are always
/// written as zero.
///
pub fn write_text(storage: &GridStorage) -> String
{
    let mut out = String::new();
    // writing into a String is infallible
    let _ = writeln!(out, "{} {} {}", TEXT_VERSION, storage.dim(), storage.len());
    let bbox = storage.bounding_box();
    let bounds: Vec<String> = (0..storage.dim()).map(|d| format!("{} {} 0 0", bbox.lower[d], bbox.upper[d])).collect();
    let _ = writeln!(out, "{}", bounds.join(" "));
    for point in storage.iter()
    {
        let _ = write!(out, "{}", storage.dim());
        for (l, i) in point.level().iter().zip(point.index())
        {
            let _ = write!(out, " {} {}", l, i);
        }
        let _ = writeln!(out, "\n{}", point.is_leaf() as u8);
    }
    out
}

pub(crate) struct Tokens<'a>
{
    inner: SplitWhitespace<'a>,
    position: usize,
}

impl<'a> Tokens<'a>
{
    pub(crate) fn new(text: &'a str) -> Self
    {
        Self { inner: text.split_whitespace(), position: 0 }
    }

    pub(crate) fn next<T: FromStr>(&mut self, what: &str) -> Result<T, SGError>
    {
        self.position += 1;
        let token = self.inner.next().ok_or_else(|| SGError::ParseError(format!("unexpected end of input, expected {}", what)))?;
        token.parse().map_err(|_| SGError::ParseError(format!("token {} '{}' is not a valid {}", self.position, token, what)))
    }

    /// Number of tokens not consumed yet.
    pub(crate) fn remaining(&self) -> usize
    {
        self.inner.clone().count()
    }

    pub(crate) fn finish(mut self) -> Result<(), SGError>
    {
        match self.inner.next()
        {
            Some(token) => Err(SGError::ParseError(format!("unexpected trailing token '{}'", token))),
            None => Ok(()),
        }
    }
}

fn parse_flag(tokens: &mut Tokens, what: &str) -> Result<bool, SGError>
{
    match tokens.next::<u8>(what)?
    {
        0 => Ok(false),
        1 => Ok(true),
        flag => Err(SGError::ParseError(format!("{} must be 0 or 1, got {}", what, flag))),
    }
}

fn parse_bounding_box(tokens: &mut Tokens, dim: usize) -> Result<BoundingBox, SGError>
{
    let mut lower = Vec::with_capacity(dim);
    let mut upper = Vec::with_capacity(dim);
    for _ in 0..dim
    {
        lower.push(tokens.next::<f64>("lower bound")?);
        upper.push(tokens.next::<f64>("upper bound")?);
        // dirichlet flags have no counterpart in the bounding box
        parse_flag(tokens, "left dirichlet flag")?;
        parse_flag(tokens, "right dirichlet flag")?;
    }
    BoundingBox::new(&lower, &upper)
}

///
/// Checks the header against the tokens that follow before anything is
/// allocated from it.
///
fn check_header(tokens: &Tokens, version: u32, dim: usize, count: usize) -> Result<(), SGError>
{
    if dim == 0 || dim > MAX_TEXT_DIM
    {
        return Err(SGError::ParseError(format!("dimension must be between 1 and {}, got {}", MAX_TEXT_DIM, dim)));
    }
    let has_leaf = version >= 2 && version != 4;
    let bbox_tokens = match version
    {
        1 | 2 => 0,
        3 | 4 => 4 * dim,
        _ => 1 + 4 * dim,
    };
    let per_point = 1 + 2 * dim + has_leaf as usize;
    let needed = count.checked_mul(per_point).and_then(|n| n.checked_add(bbox_tokens));
    let remaining = tokens.remaining();
    match needed
    {
        Some(needed) if needed <= remaining => Ok(()),
        _ => Err(SGError::ParseError(format!("header declares {} points in {} dimensions but only {} tokens follow", count, dim, remaining))),
    }
}

pub(crate) fn parse_storage(tokens: &mut Tokens) -> Result<GridStorage, SGError>
{
    let version: u32 = tokens.next("version")?;
    if version == 0 || version > MAX_TEXT_VERSION
    {
        return Err(SGError::UnsupportedVersion(version));
    }
    let dim: usize = tokens.next("dimension")?;
    let count: usize = tokens.next("point count")?;
    check_header(tokens, version, dim, count)?;
    let mut storage = match version
    {
        1 | 2 => GridStorage::new(dim),
        3 | 4 => GridStorage::with_bounding_box(parse_bounding_box(tokens, dim)?),
        _ =>
        {
            if tokens.next::<u8>("stretching mode")? != 0
            {
                return Err(SGError::ParseError("stretched domains are not supported".to_string()));
            }
            GridStorage::with_bounding_box(parse_bounding_box(tokens, dim)?)
        }
    };
    let has_leaf = version >= 2 && version != 4;
    let mut level = vec![0u8; dim];
    let mut index = vec![0u32; dim];
    for _ in 0..count
    {
        let point_dim: usize = tokens.next("point dimension")?;
        if point_dim != dim
        {
            return Err(SGError::DimensionMismatch { expected: dim, actual: point_dim });
        }
        for d in 0..dim
        {
            level[d] = tokens.next("level")?;
            index[d] = tokens.next("index")?;
        }
        let is_leaf = if has_leaf { tokens.next::<u64>("leaf flag")? != 0 } else { false };
        storage.insert(GridPoint::new(&level, &index, is_leaf))?;
    }
    let has_boundary = storage.iter().any(|point| !point.is_inner_point());
    storage.set_has_boundary(has_boundary);
    if !has_leaf
    {
        log::warn!("version {} grid description carries no leaf flags, recomputing them", version);
        storage.recalc_leaf_property()?;
    }
    Ok(storage)
}

/// Parses a storage written by [`write_text`] or by an older writer.
pub fn read_text(text: &str) -> Result<GridStorage, SGError>
{
    let mut tokens = Tokens::new(text);
    let storage = parse_storage(&mut tokens)?;
    tokens.finish()?;
    Ok(storage)
}

/// Serialize data to bytes using one of the binary formats.
pub fn serialize<T: Serialize>(data: &T, format: SerializationFormat) -> Result<Vec<u8>, SGError>
{
    if !format.is_binary()
    {
        return Err(SGError::SerializationFailed);
    }
    let bytes = bincode::serde::encode_to_vec(data, bincode::config::standard()).map_err(|_| SGError::SerializationFailed)?;
    if format.is_compressed()
    {
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }
    else
    {
        Ok(bytes)
    }
}

/// Deserialize data from bytes using one of the binary formats.
pub fn deserialize<T: DeserializeOwned>(data: &[u8], format: SerializationFormat) -> Result<T, SGError>
{
    if !format.is_binary()
    {
        return Err(SGError::DeserializationFailed);
    }
    let decode = |bytes: &[u8]| -> Result<T, SGError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map(|(value, _)| value).map_err(|_| SGError::DeserializationFailed)
    };
    if format.is_compressed()
    {
        let decompressed = lz4_flex::decompress_size_prepended(data).map_err(|_| SGError::LZ4DecompressionFailed)?;
        decode(&decompressed)
    }
    else
    {
        decode(data)
    }
}

pub fn serialize_storage(storage: &GridStorage, format: SerializationFormat) -> Result<Vec<u8>, SGError>
{
    match format
    {
        SerializationFormat::Text => Ok(write_text(storage).into_bytes()),
        _ => serialize(storage, format),
    }
}

pub fn deserialize_storage(data: &[u8], format: SerializationFormat) -> Result<GridStorage, SGError>
{
    match format
    {
        SerializationFormat::Text =>
        {
            let text = std::str::from_utf8(data).map_err(|e| SGError::ParseError(e.to_string()))?;
            read_text(text)
        }
        _ => deserialize(data, format),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn boundary_grid() -> GridStorage
    {
        let mut storage = GridStorage::with_bounding_box(BoundingBox::new(&[-1.0, 0.0], &[1.0, 2.5]).unwrap());
        crate::generators::regular_with_boundaries(&mut storage, &[2, 2], None).unwrap();
        storage
    }

    fn assert_same_storage(a: &GridStorage, b: &GridStorage)
    {
        assert_eq!(a.dim(), b.dim());
        assert_eq!(a.points(), b.points());
        assert_eq!(a.has_boundary(), b.has_boundary());
        assert_eq!(a.bounding_box(), b.bounding_box());
        for (p, q) in a.iter().zip(b.iter())
        {
            assert_eq!(p.is_leaf(), q.is_leaf());
        }
    }

    #[test]
    fn test_text_roundtrip()
    {
        let storage = boundary_grid();
        let text = write_text(&storage);
        assert!(text.starts_with("3 2 21\n-1 1 0 0 0 2.5 0 0\n2 "));
        let result = read_text(&text).unwrap();
        assert_same_storage(&storage, &result);
        assert_eq!(result.find(&storage[7]), Some(7));
    }

    #[test]
    fn test_version_1_recomputes_leaves()
    {
        let text = "1 1 3\n1 0 0\n1 0 1\n1 1 1";
        let storage = read_text(text).unwrap();
        assert_eq!(storage.len(), 3);
        assert!(storage.has_boundary());
        assert!(!storage[0].is_leaf());
        assert!(!storage[1].is_leaf());
        assert!(storage[2].is_leaf());
    }

    #[test]
    fn test_version_2_keeps_leaf_flags()
    {
        let storage = read_text("2 1 1\n1 1 1 0").unwrap();
        assert_eq!(storage.len(), 1);
        assert!(!storage[0].is_leaf());

        let text = "2 2 3\n2 1 1 1 1\n1\n2 2 1 1 1\n0\n2 2 3 1 1\n7\n";
        let storage = read_text(text).unwrap();
        assert_eq!(storage[0], GridPoint::root(2));
        assert!(storage[0].is_leaf());
        assert!(!storage[1].is_leaf());
        assert!(storage[2].is_leaf());
        assert!(!storage.has_boundary());
        assert!(storage.bounding_box().is_unit_cube());
    }

    #[test]
    fn test_bounding_box_versions()
    {
        let storage = read_text("3 1 1\n-2 2 0 1\n1 1 1\n1").unwrap();
        assert_eq!(storage.bounding_box(), &BoundingBox::new(&[-2.0], &[2.0]).unwrap());
        assert!(storage[0].is_leaf());
        // version 4 has a bounding box but no leaf flags
        let storage = read_text("4 1 2\n0 4 0 0\n1 1 1\n1 2 1").unwrap();
        assert_eq!(storage.bounding_box().upper, vec![4.0]);
        assert!(!storage[0].is_leaf());
        assert!(storage[1].is_leaf());
        let storage = read_text("5 1 1\n0\n0 3 0 0\n1 1 1\n1").unwrap();
        assert_eq!(storage.bounding_box().upper, vec![3.0]);
        assert!(matches!(read_text("5 1 1\n1\n0 3 0 0\n1 1 1\n1"), Err(SGError::ParseError(_))));
    }

    #[test]
    fn test_rejects_bad_input()
    {
        assert_eq!(read_text("6 1 0").unwrap_err(), SGError::UnsupportedVersion(6));
        assert_eq!(read_text("0 1 0").unwrap_err(), SGError::UnsupportedVersion(0));
        assert!(matches!(read_text("3 1 1 0 1 0 0 1 x 1 1"), Err(SGError::ParseError(_))));
        assert!(matches!(read_text("3 1 1 0 1 2 0 1 1 1 1"), Err(SGError::ParseError(_))));
        assert!(matches!(read_text("2 1 1 1 1 1 1 2"), Err(SGError::ParseError(_))));
        assert_eq!(read_text("2 1 1 2 1 1 1 1 1").unwrap_err(), SGError::DimensionMismatch { expected: 1, actual: 2 });
        assert_eq!(read_text("2 1 1 1 1 2 1").unwrap_err(), SGError::InvalidGridPoint);
        assert_eq!(read_text("2 1 2 1 1 1 1 1 1 1 1").unwrap_err(), SGError::DuplicateKey { seq: 0 });
    }

    #[test]
    fn test_rejects_oversized_header()
    {
        for text in ["2 18446744073709551615 0", "3 18446744073709551615 0", "1 0 0", "2 1 18446744073709551615 1 1 1 1", "3 100 0 0 1 0 0", "2 2 5 2 1 1 1 1 1"]
        {
            assert!(matches!(read_text(text), Err(SGError::ParseError(_))), "{}", text);
        }
        let storage = read_text("1 3 0").unwrap();
        assert_eq!(storage.dim(), 3);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_binary_roundtrip()
    {
        let storage = boundary_grid();
        for format in [SerializationFormat::Bincode, SerializationFormat::BincodeLz4, SerializationFormat::Text]
        {
            let bytes = serialize_storage(&storage, format).unwrap();
            let result = deserialize_storage(&bytes, format).unwrap();
            assert_same_storage(&storage, &result);
        }
        assert_eq!(deserialize_storage(&[1, 2, 3], SerializationFormat::BincodeLz4).unwrap_err(), SGError::LZ4DecompressionFailed);
        assert_eq!(serialize(&storage, SerializationFormat::Text).unwrap_err(), SGError::SerializationFailed);
    }
}
