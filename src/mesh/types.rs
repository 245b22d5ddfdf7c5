//! Flat geometry passed across the host boundary.
//!
//! Decoded geometry is plain arrays — the host's mesh construction service
//! turns them into whatever scene representation it uses, and hands edited
//! arrays of the same shape back for encoding.

use serde::Serialize;

/// Per-vertex skinning, flat with a fixed influence stride.
#[derive(Debug, Clone, Default)]
pub struct SkinData {
    /// Influences per vertex (4 or 8 in practice).
    pub influences: usize,
    /// Bone indices into the submesh-local bone-name list,
    /// `influences` entries per vertex.
    pub indices: Vec<u8>,
    /// Normalized weights, `influences` entries per vertex.
    pub weights: Vec<f32>,
}

/// Vehicle-damage alternate geometry sharing the base submesh's topology.
#[derive(Debug, Clone, Default)]
pub struct DamageGeometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
}

/// One decoded submesh, everything in authoring space.
#[derive(Debug, Clone, Default)]
pub struct SubmeshGeometry {
    /// Index of this submesh in the container's submesh table.
    pub submesh_index: usize,
    pub lod_mask: u8,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// Present when tangent decoding is enabled.
    pub tangents: Vec<[f32; 4]>,
    pub uv0: Vec<[f32; 2]>,
    pub uv1: Vec<[f32; 2]>,
    /// Byte RGBA vertex colors from the second UV slot.
    pub colors: Vec<[u8; 4]>,
    pub skin: Option<SkinData>,
    pub damage: Option<DamageGeometry>,
    /// Triangle list, file winding (the host flips via its winding flag).
    pub indices: Vec<u16>,
    /// First two triangles repeat with the last two indices swapped,
    /// the convention hair meshes use instead of backward winding.
    pub hair_winding: bool,
}

impl SubmeshGeometry {
    /// Zero-copy byte view of the position array for host-side upload.
    #[must_use]
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Zero-copy byte view of the triangle list for host-side upload.
    #[must_use]
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Decoded garment (cloth) geometry for one submesh.
#[derive(Debug, Clone, Default)]
pub struct GarmentGeometry {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u16>,
    pub skin: Option<SkinData>,
}

/// One output model: the submeshes of a single LOD bucket.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub lod_mask: u8,
    pub submeshes: Vec<SubmeshGeometry>,
    pub garments: Vec<Option<GarmentGeometry>>,
}

/// Result of decoding a whole container, best-effort per submesh.
#[derive(Debug, Default)]
pub struct DecodedMesh {
    pub models: Vec<Model>,
    /// Submesh-local bone names, in container order.
    pub bone_names: Vec<String>,
    /// Converted skeleton, present for rigged containers.
    pub skeleton: Option<crate::rig::Skeleton>,
    /// Mesh bone order mapped into the skeleton, for vertex index remap.
    pub bone_map: Vec<usize>,
    /// The host should run its vertex-cache optimizer on the constructed
    /// models.
    pub optimize_requested: bool,
    /// Sparse shape variants, decoded for morphtarget containers.
    pub morph_targets: Vec<super::morph::MorphTargetDiffs>,
    /// Submeshes that failed to decode, with the failure kept for reporting.
    pub failures: Vec<(usize, crate::error::Error)>,
}

/// One edited submesh handed back by the host for encoding.
#[derive(Debug, Clone, Default)]
pub struct EditedSubmesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 3]>,
    pub uv0: Vec<[f32; 2]>,
    pub uv1: Vec<[f32; 2]>,
    /// Colors in [0, 1] floats, quantized to bytes on encode.
    pub colors: Vec<[f32; 4]>,
    /// Per-vertex bone indices into [`EditedModel::bone_names`].
    pub skin_indices: Vec<Vec<u16>>,
    pub skin_weights: Vec<Vec<f32>>,
    pub indices: Vec<u16>,
    /// Damage positions paired with the base topology, when present.
    pub damage_positions: Vec<[f32; 3]>,
}

impl EditedSubmesh {
    /// The invisible 3-vertex placeholder written for submeshes the edited
    /// geometry no longer contains: the container's submesh table is
    /// fixed-cardinality, so entries are replaced rather than omitted.
    #[must_use]
    pub fn placeholder(rigged: bool) -> Self {
        const EPS: f32 = 0.00000000001;
        let mut submesh = Self {
            positions: vec![[EPS, 0.0, 0.0], [0.0, EPS, 0.0], [0.0, 0.0, EPS]],
            normals: vec![[0.0; 3]; 3],
            tangents: vec![[0.0; 3]; 3],
            uv0: vec![[0.0; 2]; 3],
            uv1: vec![[0.0; 2]; 3],
            colors: vec![[0.0; 4]; 3],
            indices: vec![0, 1, 2],
            ..Self::default()
        };
        if rigged {
            submesh.skin_indices = vec![vec![0; 8]; 3];
            submesh.skin_weights = vec![vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]; 3];
        }
        submesh
    }
}

/// Edited geometry for a whole container.
#[derive(Debug, Clone, Default)]
pub struct EditedModel {
    /// Bone names the skin indices refer to.
    pub bone_names: Vec<String>,
    /// Slot per container submesh; `None` slots get placeholders.
    pub submeshes: Vec<Option<EditedSubmesh>>,
}

/// Container summary for diagnostics and the CLI `inspect` command.
#[derive(Debug, Serialize)]
pub struct MeshReport {
    pub version: u32,
    pub export_names: Vec<String>,
    pub buffer_count: usize,
    pub submesh_count: usize,
    pub vertex_counts: Vec<u16>,
    pub index_counts: Vec<u32>,
    pub lod_masks: Vec<u8>,
    pub rigged: bool,
    pub has_garment: bool,
    pub has_morph_targets: bool,
}
