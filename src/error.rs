//! Error types for `redmesh`

use thiserror::Error;

/// The error type for `redmesh` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A read ran past the end of the in-memory stream.
    #[error("unexpected end of stream at offset {offset} (len {len})")]
    UnexpectedEof {
        /// Offset the read started at.
        offset: usize,
        /// Total length of the stream.
        len: usize,
    },

    // ==================== Container Errors ====================
    /// The file is not a CR2W container (missing CR2W magic).
    #[error("invalid CR2W magic: {0:#010x}")]
    BadMagic(u32),

    /// A structural offset or count in the container header is out of bounds.
    #[error("corrupt container: {message}")]
    CorruptContainer {
        /// Description of the structural inconsistency.
        message: String,
    },

    /// A required serialized field could not be located by flag scan.
    #[error("required field not found: {field}")]
    FieldNotFound {
        /// Name of the field descriptor that failed to match.
        field: &'static str,
    },

    /// A name is absent from the container's string table.
    ///
    /// Building a flag from an unresolved name would produce false matches,
    /// so this is raised instead of zero-filling the flag bytes.
    #[error("name not in string table: {name}")]
    UnresolvedName {
        /// The name that failed to resolve.
        name: String,
    },

    /// A named export (class instance) is absent from the export table.
    #[error("export not found: {name}")]
    ExportNotFound {
        /// The export class name.
        name: String,
    },

    // ==================== Buffer Errors ====================
    /// A vertex/index byte region is shorter than the declared counts imply,
    /// typically from pairing the wrong sidecar buffer file.
    #[error("buffer mismatch in submesh {submesh}: need {needed} bytes at {offset}, buffer holds {available}")]
    BufferMismatch {
        /// Index of the affected submesh.
        submesh: usize,
        /// Bytes the declared counts require.
        needed: usize,
        /// Offset the read started at.
        offset: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The referenced buffer index does not exist in the buffer table.
    #[error("buffer index {index} out of range ({count} buffers)")]
    BufferIndexOutOfRange {
        /// The requested buffer index.
        index: usize,
        /// Number of buffers in the table.
        count: usize,
    },

    /// The external codec produced a different size than the descriptor declares.
    #[error("decompression failed for buffer {index}: expected {expected} bytes, got {actual}")]
    DecompressionFailed {
        /// Buffer table index.
        index: u32,
        /// Declared decompressed size.
        expected: usize,
        /// Size the codec actually produced.
        actual: usize,
    },

    /// The external codec failed to compress a payload.
    #[error("compression failed: {message}")]
    CompressionFailed {
        /// The codec error message.
        message: String,
    },

    /// The external codec library could not be loaded.
    #[error("codec library unavailable: {message}")]
    CodecUnavailable {
        /// The loader error message.
        message: String,
    },

    // ==================== Mesh Errors ====================
    /// Geometry declares skin components but the source mesh carries no weights.
    #[error("no rigging data for submesh {submesh}")]
    NoRiggingData {
        /// Index of the affected submesh.
        submesh: usize,
    },

    /// The render blob declares no submeshes.
    #[error("container holds no submeshes")]
    NoSubmeshes,

    // ==================== Parsing Errors ====================
    /// UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// JSON serialization error (CLI reports).
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for `redmesh` operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a [`Error::CorruptContainer`] with a formatted message.
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::CorruptContainer {
            message: message.into(),
        }
    }
}
