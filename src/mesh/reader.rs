//! Container → geometry decode orchestration.
//!
//! Structural failures (bad header, missing quantization) abort the load;
//! anything scoped to one submesh is caught, logged, and reported in the
//! result so the rest of the model still comes through.

use std::path::Path;

use crate::compression::BlockCompressor;
use crate::cr2w::{read_buffer, sidecar_path, Container};
use crate::error::{Error, Result};
use crate::host::FileProvider;
use crate::io::ByteCursor;
use crate::rig::{bone_map, load_mesh_bones, load_rig, merge_skeletons};
use crate::settings::Settings;

use super::garment::{decode_garment_chunk, parse_garment};
use super::layout::{RenderBlob, RenderBufferSource};
use super::morph::{decode_morphs, MorphHeader};
use super::types::{DecodedMesh, MeshReport, Model};
use super::vertex::decode_submesh;

/// Fetch one deferred buffer, falling back to the paired sidecar file when
/// the in-container payload cannot be used.
fn buffer_or_sidecar(
    container: &Container,
    index: usize,
    codec: &dyn BlockCompressor,
    provider: &dyn FileProvider,
    container_path: Option<&Path>,
    settings: &Settings,
) -> Result<Vec<u8>> {
    if settings.compressed_buffers {
        match read_buffer(container, index, codec) {
            Ok(bytes) if !bytes.is_empty() => return Ok(bytes),
            Ok(_) => {}
            Err(e) => tracing::warn!("buffer {index}: {e}, trying sidecar"),
        }
    }
    if let Some(path) = container_path {
        let sidecar = sidecar_path(path, index);
        if provider.exists(&sidecar) {
            tracing::debug!("reading sidecar {}", sidecar.display());
            return provider.load(&sidecar);
        }
    }
    Err(Error::BufferIndexOutOfRange {
        index,
        count: container.buffers.len(),
    })
}

/// Decode a whole container into flat geometry, best-effort per submesh.
///
/// `donor_rigs` holds raw bytes of external rig files to merge ancestor
/// bones from, in priority order. `container_path` enables sidecar buffer
/// lookup.
///
/// # Errors
/// Structural failures only; per-submesh decode errors land in
/// [`DecodedMesh::failures`].
pub fn decode_mesh(
    container: &Container,
    codec: &dyn BlockCompressor,
    provider: &dyn FileProvider,
    container_path: Option<&Path>,
    donor_rigs: &[Vec<u8>],
    settings: &Settings,
) -> Result<DecodedMesh> {
    let blob = RenderBlob::parse(container)?;

    // Shared vertex/index buffer.
    let buffer_bytes = match &blob.buffer_source {
        RenderBufferSource::Embedded { start, size } => {
            let begin = blob.export.data_offset + start;
            let end = (begin + size).min(container.cursor.len());
            container.cursor.bytes()[begin..end].to_vec()
        }
        RenderBufferSource::Deferred { buffer_index } => buffer_or_sidecar(
            container,
            *buffer_index,
            codec,
            provider,
            container_path,
            settings,
        )?,
    };
    let mut buffer = ByteCursor::new(buffer_bytes);

    let mut decoded = DecodedMesh {
        optimize_requested: settings.optimize_on_import,
        ..DecodedMesh::default()
    };

    // Skeleton: embedded bones, extended by donor rigs.
    if let Some(mesh_bones) = load_mesh_bones(container, settings)? {
        decoded.bone_names = mesh_bones.anchor.names.clone();
        let mut skeleton = mesh_bones.skeleton.clone();
        for rig_bytes in donor_rigs {
            match Container::parse(rig_bytes.clone())
                .and_then(|rig| load_rig(&rig, settings, Some(&mesh_bones.anchor)))
            {
                Ok((donor, pose)) => {
                    tracing::info!("merging donor rig ({} bones, {pose:?})", donor.bones.len());
                    skeleton = merge_skeletons(&skeleton, &donor, settings);
                }
                Err(e) => tracing::warn!("donor rig rejected: {e}"),
            }
        }
        decoded.bone_map = bone_map(&decoded.bone_names, &skeleton);
        decoded.skeleton = Some(skeleton);
    }

    let garment = if settings.import_garment_mesh {
        parse_garment(container)?
    } else {
        None
    };

    // Submeshes, grouped into one model per LOD bucket.
    let mut current_lod = blob.submeshes.first().map_or(0, |s| s.lod_mask);
    let mut model = Model {
        lod_mask: current_lod,
        ..Model::default()
    };
    for (i, layout) in blob.submeshes.iter().enumerate() {
        if settings.highest_lod_only && layout.lod_mask != current_lod {
            decoded.models.push(std::mem::take(&mut model));
            current_lod = layout.lod_mask;
            model.lod_mask = current_lod;
        }

        match decode_submesh(
            &mut buffer,
            layout,
            &blob.quantization,
            blob.index_buffer_offset.value,
            settings,
            i,
        ) {
            Ok(geometry) => {
                let garment_chunk = garment.as_ref().and_then(|g| g.chunks.get(i)).map(|chunk| {
                    decode_garment_chunk(
                        container,
                        chunk,
                        layout.vertex_count.value as usize,
                        codec,
                        settings,
                    )
                });
                match garment_chunk {
                    Some(Ok(g)) => model.garments.push(Some(g)),
                    Some(Err(e)) => {
                        tracing::warn!("garment chunk {i} failed: {e}");
                        model.garments.push(None);
                    }
                    None => model.garments.push(None),
                }
                model.submeshes.push(geometry);
            }
            Err(e) => {
                tracing::warn!("submesh {i} failed: {e}");
                decoded.failures.push((i, e));
            }
        }
    }
    if !model.submeshes.is_empty() || decoded.models.is_empty() {
        decoded.models.push(model);
    }

    // Morph targets: overlay data, never load-bearing.
    if settings.import_morph_targets {
        let header = MorphHeader::parse(container)?;
        if header.num_targets > 0 {
            let fetch = |index: Option<usize>| {
                index.and_then(|i| {
                    buffer_or_sidecar(container, i, codec, provider, container_path, settings).ok()
                })
            };
            let diffs = fetch(header.diffs_buffer_index);
            let mapping = fetch(header.mapping_buffer_index);
            let chunk_vertex_counts: Vec<usize> = blob
                .submeshes
                .iter()
                .map(|s| s.vertex_count.value as usize)
                .collect();
            decoded.morph_targets = decode_morphs(
                &header,
                diffs.as_deref(),
                mapping.as_deref(),
                &chunk_vertex_counts,
            );
        }
    }

    Ok(decoded)
}

/// Summarize a container without decoding geometry.
///
/// # Errors
/// Fails only on structural header problems.
pub fn inspect_mesh(container: &Container) -> Result<MeshReport> {
    let blob = RenderBlob::parse(container)?;
    Ok(MeshReport {
        version: container.version,
        export_names: container.exports.iter().map(|e| e.name.clone()).collect(),
        buffer_count: container.buffers.len(),
        submesh_count: blob.submeshes.len(),
        vertex_counts: blob.submeshes.iter().map(|s| s.vertex_count.value).collect(),
        index_counts: blob.submeshes.iter().map(|s| s.index_count.value).collect(),
        lod_masks: blob.submeshes.iter().map(|s| s.lod_mask).collect(),
        rigged: container.names.contains("boneRigMatrices"),
        has_garment: container.export("garmentMeshParamGarment").is_some()
            || container.export("meshMeshParamCloth_Graphical").is_some(),
        has_morph_targets: container.export("rendRenderMorphTargetMeshBlob").is_some(),
    })
}
