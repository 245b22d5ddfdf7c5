//! CR2W container reader/writer.
//!
//! A container is a little-endian, offset-addressed file holding a string
//! table, an export (class instance) table, and a buffer (binary blob)
//! table. Class data carries no schema; fields are located by scanning for
//! name-index flags ([`flags`]).

pub mod buffers;
pub mod container;
pub mod flags;
pub mod names;

pub use buffers::{frame_buffer, read_buffer, sidecar_path, BufferPatch, FRAME_HEADER_LEN, KARK_MAGIC};
pub use container::{BufferDescriptor, Container, Export, CR2W_MAGIC};
pub use flags::{find_flag, require_flag, FieldFlag};
pub use names::NameTable;
