//! CR2W container header, export table and buffer table.
//!
//! Layout notes (all little-endian, offsets from file start):
//! - 0: magic `CR2W`, 4: version
//! - 24: end of serialized data, used as the flag-scan bound
//! - 40/44/52: string section offset / size / end offset
//! - 88/92: export table offset / count
//! - 100/104: buffer table offset / count (count also readable as u16)
//! - 112/116: deferred-section end / embedded-entry count; the serialized
//!   class data begins past the embedded entries (16 bytes each)
//!
//! Export records are 24 bytes: `{name: u16, pad 6, size: u32, offset: u32,
//! pad 8}`. Buffer records are 24 bytes: `{flags, index, offset, disk_size,
//! mem_size, crc32}`.

use crate::error::{Error, Result};
use crate::io::ByteCursor;

use super::names::NameTable;

/// `b"CR2W"` read as a little-endian u32.
pub const CR2W_MAGIC: u32 = u32::from_le_bytes(*b"CR2W");

const OFF_DATA_END: usize = 24;
const OFF_STRING_SECTION: usize = 40;
const OFF_STRING_END: usize = 52;
const OFF_EXPORT_TABLE: usize = 88;
const OFF_BUFFER_TABLE: usize = 100;
/// Buffer count doubles as a u16 at this offset.
pub const OFF_BUFFER_COUNT: usize = 104;
const OFF_DEFERRED_END: usize = 112;
const OFF_EMBEDDED_COUNT: usize = 116;
/// Total file size lives here and must be rewritten after buffer patching.
pub const OFF_FILE_SIZE: usize = 28;

const EXPORT_RECORD_LEN: usize = 24;
const BUFFER_RECORD_LEN: usize = 24;
const EMBEDDED_RECORD_LEN: usize = 16;

/// A named class-instance record inside the container's data section.
#[derive(Debug, Clone)]
pub struct Export {
    /// Resolved class name.
    pub name: String,
    /// Byte offset of the instance data.
    pub data_offset: usize,
    /// Byte size of the instance data.
    pub data_size: usize,
    /// Offset of this record in the export table, for write-back patching.
    pub table_offset: usize,
}

impl Export {
    /// One past the last byte of the instance data.
    #[must_use]
    pub fn data_end(&self) -> usize {
        self.data_offset + self.data_size
    }
}

/// One entry of the buffer table.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub flags: u32,
    pub index: u32,
    /// File offset of the payload.
    pub offset: u32,
    /// Bytes on disk, frame header included when compressed.
    pub disk_size: u32,
    /// Decompressed size.
    pub mem_size: u32,
    pub crc32: u32,
    /// Offset of this record in the buffer table, for write-back patching.
    pub table_offset: usize,
}

impl BufferDescriptor {
    /// `disk_size == mem_size` ⟺ stored raw.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.disk_size != self.mem_size
    }
}

/// One parsed container: header tables plus the raw file bytes.
///
/// Immutable after parse, except for in-place patching of counts/offsets
/// during the write path.
#[derive(Debug, Clone)]
pub struct Container {
    pub version: u32,
    /// End of serialized class data; flag scans never cross it.
    pub scan_bound: usize,
    /// First byte of serialized class data (past the embedded entries).
    pub scan_start: usize,
    pub names: NameTable,
    pub exports: Vec<Export>,
    pub buffers: Vec<BufferDescriptor>,
    /// The whole file.
    pub cursor: ByteCursor,
}

impl Container {
    /// Parse a container from raw file bytes.
    ///
    /// # Errors
    /// [`Error::BadMagic`] for non-CR2W input, [`Error::CorruptContainer`]
    /// when a table offset or count points outside the file.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);

        let magic = cursor.read_u32()?;
        if magic != CR2W_MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let version = cursor.read_u32()?;

        let scan_bound = cursor.u32_at(OFF_DATA_END)? as usize;
        if scan_bound > cursor.len() {
            return Err(Error::corrupt(format!(
                "data end {scan_bound} past file end {}",
                cursor.len()
            )));
        }

        let string_offset = cursor.u32_at(OFF_STRING_SECTION)? as usize;
        let string_end = cursor.u32_at(OFF_STRING_END)? as usize;
        if string_offset > string_end || string_end > cursor.len() {
            return Err(Error::corrupt(format!(
                "string section [{string_offset}, {string_end}) out of bounds"
            )));
        }
        let names = NameTable::parse(&mut cursor, string_offset, string_end)?;

        let exports = Self::parse_exports(&mut cursor, &names)?;
        let buffers = Self::parse_buffers(&mut cursor)?;

        let deferred_end = cursor.u32_at(OFF_DEFERRED_END)? as usize;
        let embedded_count = cursor.u32_at(OFF_EMBEDDED_COUNT)? as usize;
        let scan_start = deferred_end + embedded_count * EMBEDDED_RECORD_LEN;
        if scan_start > cursor.len() {
            return Err(Error::corrupt(format!(
                "data start {scan_start} past file end {}",
                cursor.len()
            )));
        }

        Ok(Self {
            version,
            scan_bound,
            scan_start,
            names,
            exports,
            buffers,
            cursor,
        })
    }

    fn parse_exports(cursor: &mut ByteCursor, names: &NameTable) -> Result<Vec<Export>> {
        let table_offset = cursor.u32_at(OFF_EXPORT_TABLE)? as usize;
        let count = cursor.u32_at(OFF_EXPORT_TABLE + 4)? as usize;
        if table_offset + count * EXPORT_RECORD_LEN > cursor.len() {
            return Err(Error::corrupt(format!(
                "export table at {table_offset} (count {count}) out of bounds"
            )));
        }

        cursor.seek(table_offset);
        let mut exports = Vec::with_capacity(count);
        for _ in 0..count {
            let record_offset = cursor.tell();
            let name_index = cursor.read_u16()?;
            cursor.skip(6);
            let data_size = cursor.read_u32()? as usize;
            let data_offset = cursor.read_u32()? as usize;
            cursor.skip(8);

            let name = names
                .get(name_index)
                .ok_or_else(|| Error::corrupt(format!("export name index {name_index} out of range")))?
                .to_string();
            if data_offset + data_size > cursor.len() {
                return Err(Error::corrupt(format!(
                    "export '{name}' data [{data_offset}, +{data_size}) out of bounds"
                )));
            }
            exports.push(Export {
                name,
                data_offset,
                data_size,
                table_offset: record_offset,
            });
        }
        Ok(exports)
    }

    fn parse_buffers(cursor: &mut ByteCursor) -> Result<Vec<BufferDescriptor>> {
        let table_offset = cursor.u32_at(OFF_BUFFER_TABLE)? as usize;
        let count = cursor.u32_at(OFF_BUFFER_TABLE + 4)? as usize;
        if table_offset + count * BUFFER_RECORD_LEN > cursor.len() {
            return Err(Error::corrupt(format!(
                "buffer table at {table_offset} (count {count}) out of bounds"
            )));
        }

        cursor.seek(table_offset);
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            let record_offset = cursor.tell();
            buffers.push(BufferDescriptor {
                flags: cursor.read_u32()?,
                index: cursor.read_u32()?,
                offset: cursor.read_u32()?,
                disk_size: cursor.read_u32()?,
                mem_size: cursor.read_u32()?,
                crc32: cursor.read_u32()?,
                table_offset: record_offset,
            });
        }
        Ok(buffers)
    }

    /// First export with the given class name.
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// First export with the given class name, as a hard requirement.
    ///
    /// # Errors
    /// Returns [`Error::ExportNotFound`].
    pub fn require_export(&self, name: &str) -> Result<&Export> {
        self.export(name).ok_or_else(|| Error::ExportNotFound {
            name: name.to_string(),
        })
    }

    /// A cursor over one export's instance data.
    #[must_use]
    pub fn export_cursor(&self, export: &Export) -> ByteCursor {
        ByteCursor::new(self.cursor.bytes()[export.data_offset..export.data_end()].to_vec())
    }

    /// Buffer count as stored in the u16 mirror field.
    pub fn buffer_count_u16(&mut self) -> Result<u16> {
        self.cursor.u16_at(OFF_BUFFER_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_magic() {
        let err = Container::parse(b"GR2W\0\0\0\0".to_vec()).unwrap_err();
        assert!(matches!(err, Error::BadMagic(_)));
    }

    #[test]
    fn rejects_truncated_tables() {
        // Valid magic, data-end field pointing past EOF.
        let mut cursor = ByteCursor::empty();
        cursor.write_u32(CR2W_MAGIC);
        cursor.write_u32(195);
        cursor.seek(OFF_DATA_END);
        cursor.write_u32(0xFFFF);
        let err = Container::parse(cursor.into_bytes()).unwrap_err();
        assert!(matches!(err, Error::CorruptContainer { .. }));
    }
}
