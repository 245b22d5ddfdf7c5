//! Field location by flag scanning.
//!
//! CR2W class data has no fixed field offsets: optional and variable-length
//! runs shift everything behind them. A field is found by scanning for its
//! "flag" — the name-table indices of its name and type, serialized as
//! consecutive little-endian u16s. Large opaque sub-blocks (topology,
//! simulation data) carry their byte length right after their own flag, so
//! the scanner can hop over them instead of walking megabytes one byte at
//! a time.

use crate::error::{Error, Result};
use crate::io::ByteCursor;

use super::names::NameTable;

/// A short byte sequence locating one serialized field.
///
/// Built through [`NameTable`] lookups so each call site names the field it
/// is after; an unresolved name fails loudly instead of zero-filling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFlag {
    /// Field name, kept for diagnostics and [`Error::FieldNotFound`].
    pub field: &'static str,
    bytes: Vec<u8>,
}

impl FieldFlag {
    /// Flag from a field name and its type name: two u16 indices.
    ///
    /// # Errors
    /// [`Error::UnresolvedName`] when either name is absent from the table.
    pub fn pair(names: &NameTable, field: &'static str, type_name: &str) -> Result<Self> {
        let mut bytes = Vec::with_capacity(4);
        bytes.extend_from_slice(&names.require(field)?.to_le_bytes());
        bytes.extend_from_slice(&names.require(type_name)?.to_le_bytes());
        Ok(Self { field, bytes })
    }

    /// Flag from a single name plus fixed zero padding.
    ///
    /// # Errors
    /// [`Error::UnresolvedName`] when the name is absent from the table.
    pub fn single(names: &NameTable, field: &'static str, padding: usize) -> Result<Self> {
        let mut bytes = Vec::with_capacity(2 + padding);
        bytes.extend_from_slice(&names.require(field)?.to_le_bytes());
        bytes.resize(2 + padding, 0);
        Ok(Self { field, bytes })
    }

    /// Flag from literal bytes (the rig parent-table sentinel).
    #[must_use]
    pub fn literal(field: &'static str, bytes: &[u8]) -> Self {
        Self {
            field,
            bytes: bytes.to_vec(),
        }
    }

    /// The raw flag bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Scan forward from the cursor position for `flag`, not crossing `bound`.
///
/// On a match the cursor is left on the first flag byte and the offset is
/// returned. At each non-matching position, if the bytes equal one of the
/// `skips` markers and the u32 four bytes past the marker is smaller than
/// the remaining stream, the block is treated as length-prefixed and hopped
/// over; otherwise the scan advances one byte. `None` means the bound was
/// reached — callers treat that as "field absent" for optional fields.
pub fn find_flag(
    cursor: &mut ByteCursor,
    flag: &FieldFlag,
    bound: usize,
    skips: &[&FieldFlag],
) -> Option<usize> {
    let bound = bound.min(cursor.len());

    while cursor.tell() + flag.len() <= bound {
        let checkpoint = cursor.tell();

        if cursor.bytes()[checkpoint..].starts_with(flag.bytes()) {
            cursor.seek(checkpoint);
            return Some(checkpoint);
        }

        let mut skipped = false;
        for skip in skips {
            if !cursor.bytes()[checkpoint..].starts_with(skip.bytes()) {
                continue;
            }
            let after = checkpoint + skip.len();
            // A plausible length-prefixed block: the count field past the
            // length must fit in what is left of the stream.
            let Ok(guard) = cursor.u32_at(after + 4) else {
                continue;
            };
            if (guard as usize) < cursor.len() - after {
                let Ok(block_len) = cursor.u32_at(after) else {
                    continue;
                };
                cursor.seek(after + block_len as usize);
                skipped = true;
                break;
            }
        }
        if !skipped {
            cursor.seek(checkpoint + 1);
        }
    }
    None
}

/// [`find_flag`] for required fields.
///
/// # Errors
/// Returns [`Error::FieldNotFound`] naming the field when the scan misses.
pub fn require_flag(
    cursor: &mut ByteCursor,
    flag: &FieldFlag,
    bound: usize,
    skips: &[&FieldFlag],
) -> Result<usize> {
    find_flag(cursor, flag, bound, skips).ok_or(Error::FieldNotFound { field: flag.field })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(names: &[&str]) -> NameTable {
        let mut t = NameTable::default();
        for n in names {
            t.push((*n).to_string());
        }
        t
    }

    #[test]
    fn flag_bytes_are_le_index_pairs() {
        let names = table(&["", "numVertices", "Uint16"]);
        let flag = FieldFlag::pair(&names, "numVertices", "Uint16").unwrap();
        assert_eq!(flag.bytes(), &[1, 0, 2, 0]);
    }

    #[test]
    fn unresolved_name_is_loud() {
        let names = table(&[""]);
        assert!(matches!(
            FieldFlag::pair(&names, "numVertices", "Uint16"),
            Err(Error::UnresolvedName { .. })
        ));
    }

    #[test]
    fn finds_flag_at_known_offset() {
        let names = table(&["", "numVertices", "Uint16"]);
        let flag = FieldFlag::pair(&names, "numVertices", "Uint16").unwrap();

        let mut data = vec![0xAAu8; 32];
        data[10..14].copy_from_slice(flag.bytes());
        let mut cursor = ByteCursor::new(data);

        assert_eq!(find_flag(&mut cursor, &flag, 32, &[]), Some(10));
        assert_eq!(cursor.tell(), 10);

        // Deterministic: same start position, same answer.
        cursor.seek(0);
        assert_eq!(find_flag(&mut cursor, &flag, 32, &[]), Some(10));
    }

    #[test]
    fn respects_bound() {
        let names = table(&["", "numVertices", "Uint16"]);
        let flag = FieldFlag::pair(&names, "numVertices", "Uint16").unwrap();
        let mut data = vec![0u8; 32];
        data[20..24].copy_from_slice(flag.bytes());
        let mut cursor = ByteCursor::new(data);
        assert_eq!(find_flag(&mut cursor, &flag, 16, &[]), None);
    }

    #[test]
    fn skip_region_hides_flag() {
        let names = table(&["", "numVertices", "Uint16", "topology", "array:rendTopologyData"]);
        let flag = FieldFlag::pair(&names, "numVertices", "Uint16").unwrap();
        let skip = FieldFlag::pair(&names, "topology", "array:rendTopologyData").unwrap();

        // skip marker at 4, block length 24, flag hidden inside the block
        let mut c = ByteCursor::new(vec![0u8; 64]);
        c.seek(4);
        c.write_bytes(skip.bytes());
        c.write_u32(24); // block length
        c.write_u32(1); // count guard, < remaining
        c.seek(16);
        c.write_bytes(flag.bytes());
        let mut cursor = ByteCursor::new(c.into_bytes());

        // With skip logic the flag inside the block is never seen.
        assert_eq!(find_flag(&mut cursor, &flag, 64, &[&skip]), None);

        // Without it, the scan walks into the block and finds the flag.
        cursor.seek(0);
        assert_eq!(find_flag(&mut cursor, &flag, 64, &[]), Some(16));
    }

    #[test]
    fn flag_after_skip_region_is_found() {
        let names = table(&["", "numVertices", "Uint16", "topology", "array:rendTopologyData"]);
        let flag = FieldFlag::pair(&names, "numVertices", "Uint16").unwrap();
        let skip = FieldFlag::pair(&names, "topology", "array:rendTopologyData").unwrap();

        let mut c = ByteCursor::new(vec![0u8; 64]);
        c.seek(4);
        c.write_bytes(skip.bytes());
        c.write_u32(24);
        c.write_u32(2);
        c.seek(4 + skip.len() + 24); // first byte past the block
        c.write_bytes(flag.bytes());
        let mut cursor = ByteCursor::new(c.into_bytes());

        assert_eq!(find_flag(&mut cursor, &flag, 64, &[&skip]), Some(32));
    }
}
