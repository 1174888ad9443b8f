//! Symbol and datatype upload parsing.
//!
//! The device publishes its symbol table and type system as two flat blobs.
//! Their sizes come from the upload info record read at
//! `SYM_UPLOADINFO2`; the blobs themselves are read from `SYM_UPLOAD` and
//! `SYM_DT_UPLOAD`.
//!
//! # Symbol Entry
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | entry length |
//! | 4 | 4 | index group |
//! | 8 | 4 | index offset |
//! | 12 | 4 | size |
//! | 16 | 4 | data type id |
//! | 20 | 4 | flags |
//! | 24 | 2 | name length |
//! | 26 | 2 | type length |
//! | 28 | 2 | comment length |
//! | 30 | .. | name, type, comment, each NUL terminated |
//!
//! # Datatype Entry
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | entry length |
//! | 4 | 4 | version |
//! | 8 | 4 | hash |
//! | 12 | 4 | type hash |
//! | 16 | 4 | size |
//! | 20 | 4 | offset within the parent |
//! | 24 | 4 | data type id |
//! | 28 | 4 | flags |
//! | 32 | 2 | name length |
//! | 34 | 2 | type length |
//! | 36 | 2 | comment length |
//! | 38 | 2 | array dimensions |
//! | 40 | 2 | sub items |
//! | 42 | .. | name, type, comment, array bounds, sub items |

use tracing::debug;

use crate::error::{AdsError, Result};
use crate::response::{latin1_until_nul, PayloadReader};

/// Bytes requested from `SYM_UPLOADINFO2`.
pub const UPLOAD_INFO_LENGTH: u32 = 0x30;

/// Datatype flag value marking the offset field as valid.
const DATATYPE_FLAG_OFFSET: u32 = 2;

const MAX_DATATYPE_DEPTH: usize = 64;

/// Sizes of the symbol and datatype upload blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UploadInfo {
    /// Number of symbols.
    pub symbol_count: u32,
    /// Byte length of the symbol blob.
    pub symbol_length: u32,
    /// Number of datatypes.
    pub datatype_count: u32,
    /// Byte length of the datatype blob.
    pub datatype_length: u32,
    /// Maximum number of dynamic symbols.
    pub max_dynamic_symbols: u32,
    /// Number of dynamic symbols in use.
    pub used_dynamic_symbols: u32,
}

impl UploadInfo {
    /// Parses the upload info record.
    ///
    /// The dynamic symbol counts are optional and read as zero when the
    /// record ends after the datatype length.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::Decode` if fewer than 16 bytes are present.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(data);
        let mut info = Self {
            symbol_count: reader.u32()?,
            symbol_length: reader.u32()?,
            datatype_count: reader.u32()?,
            datatype_length: reader.u32()?,
            ..Self::default()
        };
        if reader.remaining() >= 8 {
            info.max_dynamic_symbols = reader.u32()?;
            info.used_dynamic_symbols = reader.u32()?;
        }
        Ok(info)
    }
}

/// One entry of the symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Symbol {
    /// Index group.
    pub index_group: u32,
    /// Index offset.
    pub index_offset: u32,
    /// Size in bytes.
    pub size: u32,
    /// Data type id.
    pub data_type: u32,
    /// Symbol flags.
    pub flags: u32,
    /// Symbol name, with `[i]` appended for expanded array elements.
    pub name: String,
    /// Type name, the element type for expanded array elements.
    pub type_name: String,
    /// Comment.
    pub comment: String,
    /// Element index for expanded array elements.
    pub array_index: Option<i32>,
}

/// Array bounds of one datatype dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayDim {
    /// Lowest index.
    pub lower_bound: i32,
    /// Number of elements.
    pub elements: i32,
}

/// One node of the datatype tree.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DatatypeNode {
    /// Entry version.
    pub version: u32,
    /// Hash value.
    pub hash: u32,
    /// Type hash value.
    pub type_hash: u32,
    /// Size in bytes.
    pub size: u32,
    /// Offset within the parent type, when flagged as valid.
    pub offset: Option<u32>,
    /// Data type id.
    pub data_type: u32,
    /// Raw flags.
    pub flags: u32,
    /// Type or member name.
    pub name: String,
    /// Type name of the member.
    pub type_name: String,
    /// Comment.
    pub comment: String,
    /// Array dimensions.
    pub array_dims: Vec<ArrayDim>,
    /// One-based position among the parent's children.
    pub index: Option<u16>,
    /// Sub items.
    pub children: Vec<DatatypeNode>,
}

fn read_string(reader: &mut PayloadReader<'_>, len: u16) -> Result<String> {
    let raw = reader.take(usize::from(len) + 1)?;
    Ok(latin1_until_nul(raw))
}

fn entry_length(reader: &mut PayloadReader<'_>, start: usize) -> Result<usize> {
    let len = reader.u32()? as usize;
    if len == 0 {
        return Err(AdsError::decode(format!(
            "zero length entry at offset {start}"
        )));
    }
    Ok(len)
}

/// Parses the symbol blob.
///
/// Array symbols of the form `ARRAY [low..high] OF T` expand into one entry
/// per element unless `raw` is set.
///
/// # Example
///
/// ```
/// # fn entry(name: &str, ty: &str) -> Vec<u8> {
/// #     let mut e = vec![0u8; 30];
/// #     e[4..8].copy_from_slice(&0x4020u32.to_le_bytes());
/// #     e[12..16].copy_from_slice(&6u32.to_le_bytes());
/// #     e[24..26].copy_from_slice(&(name.len() as u16).to_le_bytes());
/// #     e[26..28].copy_from_slice(&(ty.len() as u16).to_le_bytes());
/// #     e.extend_from_slice(name.as_bytes()); e.push(0);
/// #     e.extend_from_slice(ty.as_bytes()); e.push(0);
/// #     e.push(0);
/// #     let len = e.len() as u32;
/// #     e[0..4].copy_from_slice(&len.to_le_bytes());
/// #     e
/// # }
/// use beckhoff_ads::symbol::parse_symbols;
///
/// let blob = entry("MAIN.counts", "ARRAY [1..3] OF INT");
/// let symbols = parse_symbols(&blob, false).unwrap();
/// let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
/// assert_eq!(names, ["MAIN.counts[1]", "MAIN.counts[2]", "MAIN.counts[3]"]);
/// assert_eq!(symbols[0].type_name, "INT");
/// ```
///
/// # Errors
///
/// Returns `AdsError::Decode` for a truncated entry or a zero entry length.
pub fn parse_symbols(blob: &[u8], raw: bool) -> Result<Vec<Symbol>> {
    let mut symbols = Vec::new();
    let mut start = 0;
    while start < blob.len() {
        let mut reader = PayloadReader::at(blob, start);
        let len = entry_length(&mut reader, start)?;
        let index_group = reader.u32()?;
        let index_offset = reader.u32()?;
        let size = reader.u32()?;
        let data_type = reader.u32()?;
        let flags = reader.u32()?;
        let name_len = reader.u16()?;
        let type_len = reader.u16()?;
        let comment_len = reader.u16()?;
        let symbol = Symbol {
            index_group,
            index_offset,
            size,
            data_type,
            flags,
            name: read_string(&mut reader, name_len)?,
            type_name: read_string(&mut reader, type_len)?,
            comment: read_string(&mut reader, comment_len)?,
            array_index: None,
        };
        start = start.saturating_add(len);

        let expansion = if raw {
            None
        } else {
            parse_array_type(&symbol.type_name)
                .filter(|&(low, high, _)| {
                    // Every element takes at least one byte of the symbol.
                    let fits = i64::from(high) - i64::from(low) < i64::from(symbol.size);
                    if !fits {
                        debug!(symbol = %symbol.name, size = symbol.size, "array bounds exceed symbol size");
                    }
                    fits
                })
                .map(|(low, high, element)| (low, high, element.to_owned()))
        };
        match expansion {
            Some((low, high, element)) => {
                for i in low..=high {
                    symbols.push(Symbol {
                        name: format!("{}[{}]", symbol.name, i),
                        type_name: element.clone(),
                        array_index: Some(i),
                        ..symbol.clone()
                    });
                }
            }
            None => symbols.push(symbol),
        }
    }
    debug!(count = symbols.len(), "parsed symbols");
    Ok(symbols)
}

/// Parses the datatype blob into one tree per top level type.
///
/// # Errors
///
/// Returns `AdsError::Decode` for a truncated entry, a zero entry length or
/// nesting deeper than 64 levels.
pub fn parse_datatypes(blob: &[u8]) -> Result<Vec<DatatypeNode>> {
    let mut datatypes = Vec::new();
    let mut pos = 0;
    while pos < blob.len() {
        let (node, next) = parse_datatype_entry(blob, pos, None, 0)?;
        datatypes.push(node);
        pos = next;
    }
    debug!(count = datatypes.len(), "parsed datatypes");
    Ok(datatypes)
}

/// Parses the entry at `start` and returns it with the offset of its
/// next sibling.
fn parse_datatype_entry(
    blob: &[u8],
    start: usize,
    index: Option<u16>,
    depth: usize,
) -> Result<(DatatypeNode, usize)> {
    if depth > MAX_DATATYPE_DEPTH {
        return Err(AdsError::decode(format!(
            "datatype nesting deeper than {MAX_DATATYPE_DEPTH} at offset {start}"
        )));
    }
    let mut reader = PayloadReader::at(blob, start);
    let len = entry_length(&mut reader, start)?;
    let version = reader.u32()?;
    let hash = reader.u32()?;
    let type_hash = reader.u32()?;
    let size = reader.u32()?;
    let offset = reader.u32()?;
    let data_type = reader.u32()?;
    let flags = reader.u32()?;
    let name_len = reader.u16()?;
    let type_len = reader.u16()?;
    let comment_len = reader.u16()?;
    let dim_count = reader.u16()?;
    let sub_items = reader.u16()?;

    let name = read_string(&mut reader, name_len)?;
    let type_name = read_string(&mut reader, type_len)?;
    let comment = read_string(&mut reader, comment_len)?;

    let mut array_dims = Vec::with_capacity(usize::from(dim_count));
    for _ in 0..dim_count {
        array_dims.push(ArrayDim {
            lower_bound: reader.i32()?,
            elements: reader.i32()?,
        });
    }

    let mut children = Vec::with_capacity(usize::from(sub_items));
    let mut pos = reader.position();
    for i in 0..sub_items {
        let (child, next) = parse_datatype_entry(blob, pos, Some(i + 1), depth + 1)?;
        children.push(child);
        pos = next;
    }

    let node = DatatypeNode {
        version,
        hash,
        type_hash,
        size,
        offset: (flags == DATATYPE_FLAG_OFFSET).then_some(offset),
        data_type,
        flags,
        name,
        type_name,
        comment,
        array_dims,
        index,
        children,
    };
    Ok((node, start.saturating_add(len)))
}

/// Matches `ARRAY [low..high] OF element`, ignoring case, anywhere in `ty`.
fn parse_array_type(ty: &str) -> Option<(i32, i32, &str)> {
    let upper = ty.to_ascii_uppercase();
    let mut from = 0;
    while let Some(found) = upper[from..].find("ARRAY") {
        let at = from + found;
        if let Some(parsed) = parse_array_at(ty, at + "ARRAY".len()) {
            return Some(parsed);
        }
        from = at + 1;
    }
    None
}

fn parse_array_at(ty: &str, pos: usize) -> Option<(i32, i32, &str)> {
    let rest = skip_required_whitespace(&ty[pos..])?;
    let rest = rest.strip_prefix('[')?;
    let (low, rest) = split_bound(rest)?;
    let rest = rest.strip_prefix("..")?;
    let (high, rest) = split_bound(rest)?;
    let rest = rest.strip_prefix(']')?;
    let rest = skip_required_whitespace(rest)?;
    let keyword = rest.get(..2)?;
    if !keyword.eq_ignore_ascii_case("OF") {
        return None;
    }
    let element = skip_required_whitespace(&rest[2..])?;
    Some((low, high, element))
}

fn skip_required_whitespace(s: &str) -> Option<&str> {
    let trimmed = s.trim_start_matches(|c: char| c.is_ascii_whitespace());
    (trimmed.len() < s.len()).then_some(trimmed)
}

fn split_bound(s: &str) -> Option<(i32, &str)> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(s.len());
    let bound = s[..end].parse().ok()?;
    Some((bound, &s[end..]))
}
