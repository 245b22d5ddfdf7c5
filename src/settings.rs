//! Codec settings.
//!
//! The reference tooling for this format drove behavior from a pile of
//! module-level globals. Here every entry point takes one explicit
//! [`Settings`] value instead, so two operations with different options can
//! coexist and tests can pin exact configurations.

use std::path::PathBuf;

/// Options threaded through every load/save operation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Uniform scale applied to every position/translation on decode
    /// (and divided back out on encode). The container stores meters;
    /// hosts usually want centimeters.
    pub unit_scale: f32,
    /// Read/write buffers through the block compressor. When false, buffer
    /// payloads come from paired `.buffer` sidecar files instead.
    pub compressed_buffers: bool,
    /// Group only the submeshes of the first LOD mask into the primary
    /// model; later LOD buckets each start a new model.
    pub highest_lod_only: bool,
    /// Decode tangent words alongside normals.
    pub read_tangents: bool,
    /// Decode/encode the byte-RGBA colors interleaved with the second UV set.
    pub vertex_colors: bool,
    /// Decode the auxiliary high-resolution garment (cloth) mesh.
    pub import_garment_mesh: bool,
    /// Decode/encode the vehicle-damage alternate position slot.
    pub import_damage_meshes: bool,
    /// Decode morph-target diff buffers.
    pub import_morph_targets: bool,
    /// Rebind bones whose parent cannot be resolved to a synthetic root
    /// bone instead of leaving them unparented.
    pub parent_to_root: bool,
    /// During donor-rig merge, accept ancestor chains that do not reach a
    /// bone already known to the mesh skeleton.
    pub connect_rig_to_root: bool,
    /// Flip the V coordinate of UVs on decode and back on encode.
    pub flip_uvs: bool,
    /// Re-encode every buffer on save, not only the modified ones.
    pub export_all_buffers: bool,
    /// Destination container to patch, overriding prompt-based selection.
    pub target_file_override: Option<PathBuf>,
    /// Force morphtarget submeshes to a specific vertex factory on save.
    pub vertex_factory_override: Option<u16>,
    /// Ask the host to run vertex-cache optimization after construction.
    pub optimize_on_import: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unit_scale: 100.0,
            compressed_buffers: true,
            highest_lod_only: true,
            read_tangents: false,
            vertex_colors: true,
            import_garment_mesh: false,
            import_damage_meshes: true,
            import_morph_targets: false,
            parent_to_root: true,
            connect_rig_to_root: false,
            flip_uvs: false,
            export_all_buffers: true,
            target_file_override: None,
            vertex_factory_override: None,
            optimize_on_import: false,
        }
    }
}

impl Settings {
    /// Inverse of [`Settings::unit_scale`], used on every encode path.
    #[must_use]
    pub fn inv_unit_scale(&self) -> f32 {
        1.0 / self.unit_scale
    }
}
