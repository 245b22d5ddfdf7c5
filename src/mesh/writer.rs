//! Geometry → container encode orchestration.
//!
//! Encoding patches an existing container in place: vertex and index data
//! are rebuilt into a fresh shared buffer, every count/offset field found
//! during layout discovery is rewritten at its recorded position, the
//! quantization frame is recomputed from the edited geometry, and the
//! buffer table is cascaded for the new payload sizes in one transactional
//! pass.

use crate::compression::BlockCompressor;
use crate::cr2w::{find_flag, BufferPatch, Container, FieldFlag};
use crate::error::{Error, Result};
use crate::io::ByteCursor;
use crate::settings::Settings;

use super::garment::{encode_garment_chunk, parse_garment, GarmentKind};
use super::layout::{Quantization, RenderBlob, RenderBufferSource, VertexSemantic};
use super::types::{EditedModel, EditedSubmesh};
use super::vertex::{encode_normal_word, encode_tangent_word, quantize_position};

/// Encoded output: the container plus any sidecar payloads for the
/// uncompressed-buffer workflow.
#[derive(Debug)]
pub struct EncodedMesh {
    pub container_bytes: Vec<u8>,
    /// `(buffer index, payload)` pairs to write as `.buffer` sidecars when
    /// buffers are not recompressed into the container.
    pub sidecars: Vec<(usize, Vec<u8>)>,
}

/// Submesh-local bone names from the mesh export, for skin index remap.
fn mesh_bone_names(container: &Container) -> Result<Vec<String>> {
    if !container.names.contains("boneNames") {
        return Ok(Vec::new());
    }
    let export = if let Some(e) = container.export("CMesh") {
        e
    } else if let Some(e) = container.export("MorphTargetMesh") {
        e
    } else {
        return Ok(Vec::new());
    };
    let mut cm = container.export_cursor(export);
    let skips_store = super::layout::ScanSkips::for_container(container);
    let skips = skips_store.as_refs();
    let flag = FieldFlag::pair(&container.names, "boneNames", "array:CName")?;
    if find_flag(&mut cm, &flag, export.data_size, &skips).is_none() {
        return Ok(Vec::new());
    }
    cm.skip(8);
    let count = cm.read_u32()? as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let index = cm.read_u16()?;
        names.push(container.names.get(index).unwrap_or_default().to_string());
    }
    Ok(names)
}

/// Authoring-space quantization frame derived from the edited geometry's
/// bounding box.
fn derive_quantization(submeshes: &[EditedSubmesh], settings: &Settings) -> Quantization {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    let mut any = false;
    for submesh in submeshes {
        for p in &submesh.positions {
            any = true;
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
    }
    if !any {
        return Quantization {
            scale: [1.0; 3],
            offset: [0.0; 3],
        };
    }
    let inv = settings.inv_unit_scale();
    let mut scale = [0.0f32; 3];
    let mut offset = [0.0f32; 3];
    for axis in 0..3 {
        scale[axis] = ((max[axis] - min[axis]) / 2.0 * inv).max(f32::EPSILON);
        offset[axis] = (max[axis] + min[axis]) / 2.0 * inv;
    }
    Quantization { scale, offset }
}

/// Remap one vertex's bone indices from the edited model's bone list into
/// the submesh-local list; unmatched bones repeat the last good index.
fn remap_bone_indices(
    vertex_indices: &[u16],
    model_bones: &[String],
    local_bones: &[String],
    limit: usize,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(limit);
    let mut last_good = 0u8;
    for &model_index in vertex_indices.iter().take(limit) {
        let resolved = model_bones
            .get(model_index as usize)
            .and_then(|name| local_bones.iter().position(|n| n == name));
        if let Some(local) = resolved {
            last_good = local as u8;
        }
        out.push(last_good);
    }
    out.resize(limit, last_good);
    out
}

/// Encode edited geometry over an existing container.
///
/// With `settings.compressed_buffers` the rebuilt buffers are recompressed
/// into the container and the buffer table cascaded; otherwise the
/// container is patched in place and the payloads returned as sidecars.
///
/// # Errors
/// Structural failures abort; a submesh that expects skinning but has none
/// is reported via a warning and written without weights.
pub fn encode_mesh(
    container: &Container,
    edited: &EditedModel,
    codec: &dyn BlockCompressor,
    settings: &Settings,
) -> Result<EncodedMesh> {
    let blob = RenderBlob::parse(container)?;
    let garment = parse_garment(container)?;
    let rigged = container.names.contains("boneRigMatrices");
    let local_bones = mesh_bone_names(container)?;

    // Output copy of the container; every field patch below lands here.
    let mut out = ByteCursor::new(container.cursor.bytes().to_vec());

    // Fill the fixed-cardinality submesh table, placeholders for holes.
    let submeshes: Vec<EditedSubmesh> = (0..blob.submeshes.len())
        .map(|i| {
            edited
                .submeshes
                .get(i)
                .cloned()
                .flatten()
                .unwrap_or_else(|| {
                    tracing::warn!("submesh {i} absent from edited geometry, writing placeholder");
                    EditedSubmesh::placeholder(rigged)
                })
        })
        .collect();

    let quantization = derive_quantization(&submeshes, settings);

    let mut vertex_buffer = ByteCursor::empty();
    let mut garment_streams = Vec::new();

    for (i, (layout, submesh)) in blob.submeshes.iter().zip(submeshes.iter()).enumerate() {
        let vc = submesh.positions.len();
        let stride = layout.position_stride();
        let skin_index_bytes = layout.skin_index_components() * 4;
        let skin_weight_bytes = layout.skin_weight_components() * 4;
        let has_regular_weights = layout.has(VertexSemantic::SkinIndices);
        let mut rigging_warned = false;

        let mut uv_sets_seen = 0usize;
        for component in &layout.components {
            let data_start = vertex_buffer.tell();
            match component.semantic {
                VertexSemantic::Position => {
                    if let Some(slot) = layout.byte_offsets.first() {
                        out.write_u32_at(slot.position, data_start as u32);
                    }
                    for v in 0..vc {
                        let vertex_start = vertex_buffer.tell();
                        let q = quantize_position(submesh.positions[v], &quantization, settings.unit_scale);
                        vertex_buffer.write_i16(-q[0]);
                        vertex_buffer.write_i16(q[2]);
                        vertex_buffer.write_i16(q[1]);
                        vertex_buffer.write_i16(32767);

                        if rigged && has_regular_weights {
                            if submesh.skin_weights.get(v).is_none() && !rigging_warned {
                                tracing::warn!(
                                    "{}",
                                    Error::NoRiggingData { submesh: i }
                                );
                                rigging_warned = true;
                            }
                            let indices = remap_bone_indices(
                                submesh.skin_indices.get(v).map_or(&[], Vec::as_slice),
                                &edited.bone_names,
                                &local_bones,
                                skin_index_bytes,
                            );
                            vertex_buffer.write_bytes(&indices);
                            for slot in 0..skin_weight_bytes {
                                let weight = submesh
                                    .skin_weights
                                    .get(v)
                                    .and_then(|w| w.get(slot))
                                    .copied()
                                    .unwrap_or(0.0);
                                vertex_buffer.write_u8((weight * 255.0) as u8);
                            }
                        }
                        // Zero-fill whatever the stride still expects
                        // (extra-data slots, unrigged strides).
                        while vertex_buffer.tell() - vertex_start < stride {
                            vertex_buffer.write_u8(0);
                        }
                    }
                }
                VertexSemantic::TexCoord => {
                    if uv_sets_seen == 0 {
                        if let Some(slot) = layout.byte_offsets.get(1) {
                            out.write_u32_at(slot.position, data_start as u32);
                        }
                        for v in 0..vc {
                            let uv = submesh.uv0.get(v).copied().unwrap_or_default();
                            vertex_buffer.write_f16(uv[0]);
                            vertex_buffer.write_f16(if settings.flip_uvs { 1.0 - uv[1] } else { uv[1] });
                        }
                    } else if uv_sets_seen == 1 {
                        if let Some(slot) = layout.byte_offsets.get(3) {
                            out.write_u32_at(slot.position, data_start as u32);
                        }
                        // A missing second set falls back to the first.
                        let uv1: &[[f32; 2]] = if submesh.uv1.is_empty() {
                            tracing::warn!("submesh {i}: no second UV set, repeating the first");
                            &submesh.uv0
                        } else {
                            &submesh.uv1
                        };
                        for v in 0..vc {
                            if settings.vertex_colors {
                                let color = submesh.colors.get(v).copied().unwrap_or_default();
                                for channel in color {
                                    vertex_buffer.write_u8((channel * 255.0) as u8);
                                }
                            } else {
                                vertex_buffer.write_u32(0);
                            }
                            let uv = uv1.get(v).copied().unwrap_or_default();
                            vertex_buffer.write_f16(uv[0]);
                            vertex_buffer.write_f16(if settings.flip_uvs { 1.0 - uv[1] } else { uv[1] });
                        }
                    }
                    uv_sets_seen += 1;
                }
                VertexSemantic::Normal => {
                    if let Some(slot) = layout.byte_offsets.get(2) {
                        out.write_u32_at(slot.position, data_start as u32);
                    }
                    for v in 0..vc {
                        let normal = submesh.normals.get(v).copied().unwrap_or([0.0, 0.0, 1.0]);
                        let tangent = submesh.tangents.get(v).copied().unwrap_or([1.0, 0.0, 0.0]);
                        vertex_buffer.write_u32(encode_normal_word(normal));
                        vertex_buffer.write_u32(encode_tangent_word(tangent));
                    }
                }
                VertexSemantic::VehicleDmgPosition => {
                    if let Some(slot) = layout.byte_offsets.get(4) {
                        out.write_u32_at(slot.position, data_start as u32);
                    }
                    // Edited damage geometry pairs with the base topology;
                    // fall back to the base positions when absent.
                    let use_damage = settings.import_damage_meshes
                        && submesh.damage_positions.len() == submesh.positions.len();
                    let inv = settings.inv_unit_scale();
                    for v in 0..vc {
                        let normal = submesh.normals.get(v).copied().unwrap_or([0.0, 0.0, 1.0]);
                        vertex_buffer.write_u32(encode_normal_word(normal));
                        let p = if use_damage {
                            submesh.damage_positions[v]
                        } else {
                            submesh.positions[v]
                        };
                        vertex_buffer.write_f32(-p[0] * inv * 0.01);
                        vertex_buffer.write_f32(p[2] * inv * 0.01);
                        vertex_buffer.write_f32(p[1] * inv * 0.01);
                        vertex_buffer.write_f32(0.0);
                    }
                }
                _ => continue,
            }

            // Component blocks are 16-byte aligned.
            while (vertex_buffer.tell() - data_start) % 16 != 0 {
                vertex_buffer.write_u8(0);
            }
        }

        // Garment streams are rebuilt from the same edited submesh.
        if let Some(garment) = garment.as_ref() {
            if let Some(chunk) = garment.chunks.get(i) {
                if let Some(patch) = chunk.vertex_count_patch {
                    out.write_u32_at(patch, vc as u32);
                }
                garment_streams.push((
                    i,
                    encode_garment_chunk(
                        garment.kind,
                        chunk,
                        &submesh.positions,
                        &submesh.indices,
                        &submesh.skin_indices,
                        &submesh.skin_weights,
                        settings,
                    ),
                ));
            }
        }
    }

    let vertex_data_size = vertex_buffer.tell();

    // The index section starts on a 1024-byte boundary.
    while vertex_buffer.tell() % 1024 != 0 {
        vertex_buffer.write_u8(0);
    }
    let index_section_offset = vertex_buffer.tell();

    for (i, (layout, submesh)) in blob.submeshes.iter().zip(submeshes.iter()).enumerate() {
        if i > 0 && layout.index_chunk_offset.position != 0 {
            out.write_u32_at(
                layout.index_chunk_offset.position,
                (vertex_buffer.tell() - index_section_offset) as u32,
            );
        }
        for triangle in submesh.indices.chunks(3) {
            if triangle.len() == 3 {
                vertex_buffer.write_u16(triangle[2]);
                vertex_buffer.write_u16(triangle[1]);
                vertex_buffer.write_u16(triangle[0]);
            }
        }
    }
    let index_data_size = vertex_buffer.tell() - index_section_offset;

    // Index offset plus the size fields sitting 12 and 24 bytes before it.
    let index_offset_pos = blob.index_buffer_offset.position;
    out.write_u32_at(index_offset_pos, index_section_offset as u32);
    if index_offset_pos >= 24 {
        out.write_u32_at(index_offset_pos - 12, index_data_size as u32);
        out.write_u32_at(index_offset_pos - 24, vertex_data_size as u32);
    }

    // Quantization frame, translated back to container axes: the float
    // slots sit at +17/+29/+41 and +76/+88/+100 past the flag match.
    let qp = blob.quantization_position;
    out.write_f32_at(qp + 17, quantization.scale[0]);
    out.write_f32_at(qp + 29, quantization.scale[2]);
    out.write_f32_at(qp + 41, quantization.scale[1]);
    out.write_f32_at(qp + 76, -quantization.offset[0]);
    out.write_f32_at(qp + 88, quantization.offset[2]);
    out.write_f32_at(qp + 100, quantization.offset[1]);

    // Vertex/index counts that changed.
    for (layout, submesh) in blob.submeshes.iter().zip(submeshes.iter()) {
        if submesh.positions.len() != layout.vertex_count.value as usize {
            out.write_u16_at(layout.vertex_count.position, submesh.positions.len() as u16);
        }
        if submesh.indices.len() != layout.index_count.value as usize {
            out.write_u32_at(layout.index_count.position, submesh.indices.len() as u32);
        }
    }

    patch_morph_metadata(container, &mut out, settings)?;
    patch_lod_count(container, &mut out, settings)?;

    // Buffer assembly.
    let mut sidecars = Vec::new();
    let vertex_payload = vertex_buffer.into_bytes();

    let container_bytes = match (&blob.buffer_source, settings.compressed_buffers) {
        (RenderBufferSource::Deferred { buffer_index }, true) => {
            let mut patch = BufferPatch::new(container);
            patch.replace(*buffer_index, &vertex_payload, codec)?;
            replace_garment_buffers(&mut patch, &garment_streams, &garment, codec)?;
            patch.apply(container, out.bytes())?
        }
        (RenderBufferSource::Deferred { buffer_index }, false) => {
            sidecars.push((*buffer_index, vertex_payload));
            collect_garment_sidecars(&mut sidecars, &garment_streams, &garment);
            // A complete sidecar set, not just the rewritten buffers, so the
            // output works standalone.
            if settings.export_all_buffers {
                for index in 0..container.buffers.len() {
                    if sidecars.iter().any(|(i, _)| *i == index) {
                        continue;
                    }
                    match crate::cr2w::read_buffer(container, index, codec) {
                        Ok(payload) => sidecars.push((index, payload)),
                        Err(e) => tracing::warn!("buffer {index} not exported: {e}"),
                    }
                }
            }
            out.into_bytes()
        }
        (RenderBufferSource::Embedded { start, size }, _) => {
            let spliced = splice_embedded_buffer(&blob, &out, *start, *size, &vertex_payload)?;
            if container.buffers.is_empty() {
                spliced
            } else {
                let patch = BufferPatch::new(container);
                patch.apply(container, &spliced)?
            }
        }
    };

    Ok(EncodedMesh {
        container_bytes,
        sidecars,
    })
}

/// Swap the embedded render buffer payload for a new one, shifting the rest
/// of the file and patching the export's size.
fn splice_embedded_buffer(
    blob: &RenderBlob,
    out: &ByteCursor,
    start: usize,
    old_size: usize,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let abs_start = blob.export.data_offset + start;
    if abs_start < 8 || abs_start + old_size > out.len() {
        return Err(Error::corrupt("embedded buffer region out of bounds".to_string()));
    }
    let diff = payload.len() as i64 - old_size as i64;

    let mut spliced = ByteCursor::new(out.bytes()[..abs_start - 8].to_vec());
    spliced.seek(abs_start - 8);
    spliced.write_u32(payload.len() as u32 + 8);
    spliced.write_u32(payload.len() as u32);
    spliced.write_bytes(payload);
    spliced.write_u16(0);
    // 2 bytes of trailing data existed before the splice too.
    let tail_start = (abs_start + old_size + 2).min(out.len());
    spliced.write_bytes(&out.bytes()[tail_start..]);

    // The owning export grew/shrank with the payload.
    let new_size = (blob.export.data_size as i64 + diff) as u32;
    spliced.write_u32_at(blob.export.table_offset + 8, new_size);
    Ok(spliced.into_bytes())
}

fn replace_garment_buffers(
    patch: &mut BufferPatch,
    streams: &[(usize, super::garment::GarmentChunkStreams)],
    garment: &Option<super::garment::GarmentMesh>,
    codec: &dyn BlockCompressor,
) -> Result<()> {
    let Some(garment) = garment else { return Ok(()) };
    for (i, stream) in streams {
        let chunk = &garment.chunks[*i];
        let pairs: [(Option<usize>, &Vec<u8>); 7] = [
            (chunk.vertices, &stream.vertices),
            (chunk.indices, &stream.indices),
            (chunk.skin_weights, &stream.skin_weights),
            (chunk.skin_indices, &stream.skin_indices),
            (chunk.skin_weights_ext, &stream.skin_weights_ext),
            (chunk.skin_indices_ext, &stream.skin_indices_ext),
            (
                if garment.kind == GarmentKind::Param {
                    chunk.morph_offsets
                } else {
                    None
                },
                &stream.morph_offsets,
            ),
        ];
        for (index, payload) in pairs {
            if let Some(index) = index {
                if !payload.is_empty() {
                    patch.replace(index, payload, codec)?;
                }
            }
        }
    }
    Ok(())
}

fn collect_garment_sidecars(
    sidecars: &mut Vec<(usize, Vec<u8>)>,
    streams: &[(usize, super::garment::GarmentChunkStreams)],
    garment: &Option<super::garment::GarmentMesh>,
) {
    let Some(garment) = garment else { return };
    for (i, stream) in streams {
        let chunk = &garment.chunks[*i];
        for (index, payload) in [
            (chunk.vertices, &stream.vertices),
            (chunk.indices, &stream.indices),
            (chunk.skin_weights, &stream.skin_weights),
            (chunk.skin_indices, &stream.skin_indices),
            (chunk.skin_weights_ext, &stream.skin_weights_ext),
            (chunk.skin_indices_ext, &stream.skin_indices_ext),
            (chunk.morph_offsets, &stream.morph_offsets),
            (chunk.garment_flags, &stream.garment_flags),
        ] {
            if let Some(index) = index {
                if !payload.is_empty() {
                    sidecars.push((index, payload.clone()));
                }
            }
        }
    }
}

/// A rebuilt mesh invalidates the morph diffs layered on it: zero the
/// target tables, and apply the vertex-factory override when configured.
fn patch_morph_metadata(
    container: &Container,
    out: &mut ByteCursor,
    settings: &Settings,
) -> Result<()> {
    let Some(export) = container.export("MorphTargetMesh") else {
        return Ok(());
    };
    let names = &container.names;
    let targets_flag = FieldFlag::pair(names, "targets", "array:MorphTargetMeshEntry").ok();

    let mut zero_field = |flag: Option<FieldFlag>| {
        if let Some(flag) = flag {
            let mut cm = ByteCursor::new(
                out.bytes()[export.data_offset..export.data_end().min(out.len())].to_vec(),
            );
            let skips: Vec<&FieldFlag> = targets_flag
                .iter()
                .filter(|t| t.field != flag.field)
                .collect();
            let cm_len = cm.len();
            if find_flag(&mut cm, &flag, cm_len, &skips).is_some() {
                out.write_u32_at(export.data_offset + cm.tell() + 8, 0);
            }
        }
    };

    zero_field(targets_flag.clone());
    zero_field(FieldFlag::pair(names, "numTargets", "Uint32").ok());
    zero_field(
        FieldFlag::pair(
            names,
            "targetTextureDiffsData",
            "array:rendRenderMorphTargetMeshBlobTextureData",
        )
        .ok(),
    );

    if let Some(factory) = settings.vertex_factory_override {
        if let Ok(flag) = FieldFlag::pair(names, "vertexFactory", "Uint8") {
            if let Some(blob_export) = container.export("rendRenderMeshBlob") {
                let mut rm = ByteCursor::new(
                    out.bytes()[blob_export.data_offset..blob_export.data_end().min(out.len())]
                        .to_vec(),
                );
                let rm_len = rm.len();
                if find_flag(&mut rm, &flag, rm_len, &[]).is_some() {
                    out.write_u16_at(blob_export.data_offset + rm.tell() + 8, factory);
                }
            }
        }
    }
    Ok(())
}

/// Resolve the container to patch: the configured override wins, otherwise
/// the user is asked, offering `default`. `None` means cancellation.
pub fn resolve_target(
    settings: &Settings,
    provider: &dyn crate::host::FileProvider,
    default: &std::path::Path,
) -> Option<std::path::PathBuf> {
    if let Some(target) = &settings.target_file_override {
        return Some(target.clone());
    }
    let mut candidate = default.to_path_buf();
    loop {
        let picked = provider.prompt_path("Container to export over", &candidate)?;
        if provider.exists(&picked) {
            return Some(picked);
        }
        tracing::warn!("{} not found", picked.display());
        if picked == candidate {
            // Non-interactive provider, nothing better will come.
            return None;
        }
        candidate = picked;
    }
}

/// When only the highest LOD survives the edit, the LOD table shrinks to
/// one entry.
fn patch_lod_count(container: &Container, out: &mut ByteCursor, settings: &Settings) -> Result<()> {
    if !settings.highest_lod_only {
        return Ok(());
    }
    let Ok(flag) = FieldFlag::pair(&container.names, "renderLODs", "array:Float") else {
        return Ok(());
    };
    let Some(export) = container.export("rendRenderMeshBlob") else {
        return Ok(());
    };
    let mut rm = ByteCursor::new(
        out.bytes()[export.data_offset..export.data_end().min(out.len())].to_vec(),
    );
    let rm_len = rm.len();
    if find_flag(&mut rm, &flag, rm_len, &[]).is_some() {
        out.write_u32_at(export.data_offset + rm.tell() + 8, 1);
    }
    Ok(())
}
