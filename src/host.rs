//! Host collaborator interfaces.
//!
//! The codec core never builds scene objects, decodes images, or talks to
//! the user; those live in the embedding application and are consumed
//! through the traits here as opaque services.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Axis remap the host applies when constructing a model from decoded
/// arrays. Rows are the output basis expressed in input axes.
pub const AXIS_REMAP: [[f32; 3]; 3] = [[-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]];

/// Opaque handle to a host-constructed model.
pub type ModelHandle = u64;

/// One bone record as the host's scene graph wants it.
#[derive(Debug, Clone)]
pub struct BoneRecord {
    pub name: String,
    /// Index of the parent in the same record list; -1 for roots.
    pub parent_index: i32,
    /// Column-major local transform.
    pub local_matrix: [f32; 16],
}

/// Flat arrays for one submesh, ready for host-side mesh construction.
#[derive(Debug, Default)]
pub struct MeshArrays<'a> {
    pub positions: &'a [[f32; 3]],
    pub normals: &'a [[f32; 3]],
    pub tangents: &'a [[f32; 4]],
    pub uv0: &'a [[f32; 2]],
    pub uv1: &'a [[f32; 2]],
    pub colors: &'a [[u8; 4]],
    pub skin_indices: &'a [u8],
    pub skin_weights: &'a [f32],
    /// Influences per vertex for the skin arrays.
    pub influences: usize,
    pub indices: &'a [u16],
    /// Reverse triangle winding on construction.
    pub flip_winding: bool,
}

/// Mesh construction service: turns flat arrays into renderable models.
pub trait MeshSink {
    /// Construct a model from one or more submeshes sharing a skeleton.
    ///
    /// # Errors
    /// Host-defined construction failures.
    fn build_model(&mut self, name: &str, submeshes: &[MeshArrays<'_>]) -> Result<ModelHandle>;

    /// Attach a bone hierarchy to a constructed model.
    ///
    /// # Errors
    /// Host-defined failures.
    fn append_bones(&mut self, model: ModelHandle, bones: &[BoneRecord]) -> Result<()>;
}

/// Image codec for block-compressed texture payloads.
pub trait ImageCodec {
    /// Decode block-compressed bytes to flat RGBA8.
    ///
    /// # Errors
    /// Host-defined decode failures.
    fn decode(&self, encoded: &[u8], width: u32, height: u32, format: u32) -> Result<Vec<u8>>;

    /// Encode flat RGBA8 to block-compressed bytes.
    ///
    /// # Errors
    /// Host-defined encode failures.
    fn encode(&self, rgba: &[u8], width: u32, height: u32, format: u32) -> Result<Vec<u8>>;
}

/// Blocking file and prompt services. A `None` from the prompt means the
/// user cancelled; callers abort quietly.
pub trait FileProvider {
    fn exists(&self, path: &Path) -> bool;

    /// Load a file into memory.
    ///
    /// # Errors
    /// IO failures.
    fn load(&self, path: &Path) -> Result<Vec<u8>>;

    /// Ask the user for a path, offering a default.
    fn prompt_path(&self, title: &str, default: &Path) -> Option<PathBuf>;
}

/// [`FileProvider`] over the real filesystem with no interactive prompts;
/// the prompt always takes the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFileProvider;

impl FileProvider for DiskFileProvider {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn load(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn prompt_path(&self, _title: &str, default: &Path) -> Option<PathBuf> {
        Some(default.to_path_buf())
    }
}
