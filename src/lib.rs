//! # redmesh
//!
//! A pure-Rust library for working with Cyberpunk 2077 / REDengine file
//! formats.
//!
//! ## Supported formats
//!
//! - **CR2W containers** - the engine's serialized asset files (name table,
//!   export table, deferred buffer table, flag-scanned fields)
//! - **`.mesh`** - quantized vertex streams, LODs, skinning, vehicle damage
//!   and garment (cloth) overlays
//! - **`.morphtarget`** - sparse per-vertex shape diffs
//! - **`.rig`** - bone hierarchies and bind poses, mergeable into a mesh's
//!   embedded partial skeleton
//!
//! ## Quick start
//!
//! ```no_run
//! use redmesh::prelude::*;
//!
//! let settings = Settings::default();
//! let codec = Lz4Compressor; // or OodleCompressor::load(...) for game files
//! let container = Container::parse(std::fs::read("body.mesh")?)?;
//! let decoded = decode_mesh(
//!     &container,
//!     &codec,
//!     &DiskFileProvider,
//!     None,
//!     &[],
//!     &settings,
//! )?;
//! println!("{} model(s)", decoded.models.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Feature flags
//!
//! - `cli` - Enables the `redmesh` command-line binary

pub mod compression;
pub mod cr2w;
pub mod error;
pub mod host;
pub mod io;
pub mod mesh;
pub mod rig;
pub mod settings;

// Re-exports for convenience
pub use error::{Error, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::compression::{BlockCompressor, Lz4Compressor, OodleCompressor};
    pub use crate::cr2w::{BufferPatch, Container, FieldFlag, NameTable};
    pub use crate::error::{Error, Result};
    pub use crate::host::{DiskFileProvider, FileProvider, ImageCodec, MeshSink};
    pub use crate::io::ByteCursor;
    pub use crate::mesh::{
        decode_mesh, encode_mesh, inspect_mesh, DecodedMesh, EditedModel, EditedSubmesh,
        MeshReport, Model,
    };
    pub use crate::rig::{
        load_mesh_bones, load_rig, merge_skeletons, write_rig, Bone, RootPolicy, Skeleton,
    };
    pub use crate::settings::Settings;
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;
