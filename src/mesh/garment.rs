//! Garment (cloth) mesh codec.
//!
//! Cloth data rides in its own export, one chunk per submesh, with every
//! stream in a separate deferred buffer: full-precision positions, u16
//! faces, and byte/float skinning split across a base buffer and an
//! optional extension buffer for 8-influence vertices. Two container
//! generations exist; the chunk records differ but the streams do not.

use crate::compression::BlockCompressor;
use crate::cr2w::{find_flag, read_buffer, Container, FieldFlag};
use crate::error::Result;
use crate::io::ByteCursor;
use crate::settings::Settings;

use super::types::{GarmentGeometry, SkinData};

/// Which export carries the cloth data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarmentKind {
    /// `garmentMeshParamGarment`: positions, faces, morph offsets, flags.
    Param,
    /// `meshMeshParamCloth_Graphical`: positions, faces, split skinning.
    Cloth,
}

/// Buffer indices for one cloth chunk (0-based; the records store 1-based).
#[derive(Debug, Clone, Default)]
pub struct GarmentChunk {
    /// Absolute offset of the chunk's vertex-count field, patched on write.
    pub vertex_count_patch: Option<usize>,
    pub vertices: Option<usize>,
    pub indices: Option<usize>,
    pub morph_offsets: Option<usize>,
    pub garment_flags: Option<usize>,
    pub skin_weights: Option<usize>,
    pub skin_indices: Option<usize>,
    pub skin_weights_ext: Option<usize>,
    pub skin_indices_ext: Option<usize>,
}

/// Parsed cloth chunk table.
#[derive(Debug)]
pub struct GarmentMesh {
    pub kind: GarmentKind,
    pub chunks: Vec<GarmentChunk>,
}

fn buffer_index(stored: u16) -> Option<usize> {
    (stored > 0).then(|| stored as usize - 1)
}

/// Locate and parse the cloth chunk table, if the container has one.
///
/// # Errors
/// Only structural read errors; containers without cloth return `None`.
pub fn parse_garment(container: &Container) -> Result<Option<GarmentMesh>> {
    let names = &container.names;
    let (kind, export) = if let Some(e) = container.export("garmentMeshParamGarment") {
        (GarmentKind::Param, e)
    } else if let Some(e) = container.export("meshMeshParamCloth_Graphical") {
        (GarmentKind::Cloth, e)
    } else {
        return Ok(None);
    };

    let mut gm = container.export_cursor(export);
    let bound = export.data_size;

    let chunk_flag = match kind {
        GarmentKind::Param => FieldFlag::pair(names, "vertices", "DataBuffer")?,
        GarmentKind::Cloth => {
            // The chunk array header precedes the first chunk; position the
            // cursor on it so the leading count read below lines up.
            let chunks_flag = FieldFlag::pair(names, "chunks", "array:meshGfxClothChunkData")?;
            let skip = FieldFlag::pair(names, "simulation", "array:Uint16").ok();
            let skips: Vec<&FieldFlag> = skip.iter().collect();
            let _ = find_flag(&mut gm, &chunks_flag, bound, &skips);
            gm.skip(-1);
            FieldFlag::pair(names, "positions", "DataBuffer")?
        }
    };

    gm.skip(9);
    let chunk_count = gm.read_u32()?;

    let mut chunks = Vec::new();
    while (chunks.len() as u32) < chunk_count {
        if find_flag(&mut gm, &chunk_flag, bound, &[]).is_none() {
            break;
        }
        let pos = gm.tell();
        gm.seek(pos + 8);
        let mut chunk = GarmentChunk::default();
        if kind == GarmentKind::Param {
            // 24 bytes back from the buffer index sits the chunk's vertex
            // count; +3 lands on its value bytes.
            chunk.vertex_count_patch = Some(export.data_offset + gm.tell() - 24 + 3);
        }
        chunk.vertices = buffer_index(gm.read_u16()?);
        gm.skip(10);
        chunk.indices = buffer_index(gm.read_u16()?);

        match kind {
            GarmentKind::Cloth => {
                gm.skip(10);
                chunk.skin_weights = buffer_index(gm.read_u16()?);
                gm.skip(10);
                chunk.skin_indices = buffer_index(gm.read_u16()?);

                // 8-influence chunks carry a second weight/index pair.
                let probe = gm.u16_at(gm.tell() + 2)?;
                if container.names.get(probe) == Some("skinWeightsExt") {
                    gm.skip(10);
                    chunk.skin_weights_ext = buffer_index(gm.read_u16()?);
                    gm.skip(10);
                    chunk.skin_indices_ext = buffer_index(gm.read_u16()?);
                }

                // Hop the simulation index list separating chunk records.
                let probe = gm.u16_at(gm.tell())?;
                if container.names.get(probe) == Some("simulation") {
                    let skip_len = gm.u32_at(gm.tell() + 4)?;
                    gm.skip(i64::from(skip_len) + 6);
                }
            }
            GarmentKind::Param => {
                gm.skip(10);
                chunk.morph_offsets = buffer_index(gm.read_u16()?);
                gm.skip(10);
                chunk.garment_flags = buffer_index(gm.read_u16()?);
            }
        }
        chunks.push(chunk);
    }

    Ok(Some(GarmentMesh { kind, chunks }))
}

/// Decode one chunk's streams into flat geometry.
///
/// # Errors
/// Propagates buffer-table and codec failures; absent streams decode to
/// empty fields.
pub fn decode_garment_chunk(
    container: &Container,
    chunk: &GarmentChunk,
    vertex_count: usize,
    codec: &dyn BlockCompressor,
    settings: &Settings,
) -> Result<GarmentGeometry> {
    let mut geometry = GarmentGeometry::default();

    if let Some(index) = chunk.vertices {
        let bytes = read_buffer(container, index, codec)?;
        let mut cursor = ByteCursor::new(bytes);
        geometry.positions = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            let x = cursor.read_f32()?;
            let y = cursor.read_f32()?;
            let z = cursor.read_f32()?;
            geometry.positions.push([
                x * settings.unit_scale,
                z * settings.unit_scale,
                y * settings.unit_scale,
            ]);
        }
    }

    if let Some(index) = chunk.indices {
        let bytes = read_buffer(container, index, codec)?;
        let mut cursor = ByteCursor::new(bytes);
        let count = cursor.len() / 2;
        geometry.indices = Vec::with_capacity(count);
        for _ in 0..count {
            geometry.indices.push(cursor.read_u16()?);
        }
    }

    if let Some(weights_index) = chunk.skin_weights {
        let indices_bytes = match chunk.skin_indices {
            Some(i) => read_buffer(container, i, codec)?,
            None => Vec::new(),
        };
        let weights_bytes = read_buffer(container, weights_index, codec)?;
        let ext = match (chunk.skin_indices_ext, chunk.skin_weights_ext) {
            (Some(i), Some(w)) => Some((
                read_buffer(container, i, codec)?,
                read_buffer(container, w, codec)?,
            )),
            _ => None,
        };
        geometry.skin = Some(interleave_skin(&indices_bytes, &weights_bytes, ext.as_ref(), vertex_count));
    }

    Ok(geometry)
}

/// Merge base (4-influence) and extension (4 more) streams into one flat
/// skin layout.
fn interleave_skin(
    indices: &[u8],
    weights: &[u8],
    ext: Option<&(Vec<u8>, Vec<u8>)>,
    vertex_count: usize,
) -> SkinData {
    let influences = if ext.is_some() { 8 } else { 4 };
    let mut skin = SkinData {
        influences,
        indices: Vec::with_capacity(vertex_count * influences),
        weights: Vec::with_capacity(vertex_count * influences),
    };
    let read_f32 = |bytes: &[u8], at: usize| -> f32 {
        bytes
            .get(at..at + 4)
            .map_or(0.0, |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    for v in 0..vertex_count {
        for i in 0..4 {
            skin.indices.push(indices.get(v * 4 + i).copied().unwrap_or(0));
            skin.weights.push(read_f32(weights, (v * 4 + i) * 4));
        }
        if let Some((ext_indices, ext_weights)) = ext {
            for i in 0..4 {
                skin.indices.push(ext_indices.get(v * 4 + i).copied().unwrap_or(0));
                skin.weights.push(read_f32(ext_weights, (v * 4 + i) * 4));
            }
        }
    }
    skin
}

/// Encoded cloth streams for one chunk, ready for the buffer patch.
#[derive(Debug, Default)]
pub struct GarmentChunkStreams {
    pub vertices: Vec<u8>,
    pub indices: Vec<u8>,
    pub morph_offsets: Vec<u8>,
    pub garment_flags: Vec<u8>,
    pub skin_indices: Vec<u8>,
    pub skin_weights: Vec<u8>,
    pub skin_indices_ext: Vec<u8>,
    pub skin_weights_ext: Vec<u8>,
}

/// Encode one edited submesh's cloth streams.
#[must_use]
pub fn encode_garment_chunk(
    kind: GarmentKind,
    chunk: &GarmentChunk,
    positions: &[[f32; 3]],
    indices: &[u16],
    skin_indices: &[Vec<u16>],
    skin_weights: &[Vec<f32>],
    settings: &Settings,
) -> GarmentChunkStreams {
    let inv = settings.inv_unit_scale();
    let mut streams = GarmentChunkStreams::default();

    let mut vertices = ByteCursor::empty();
    for p in positions {
        vertices.write_f32(p[0] * inv);
        vertices.write_f32(p[2] * inv);
        vertices.write_f32(p[1] * inv);
    }
    streams.vertices = vertices.into_bytes();

    // Face stream mirrors the main index buffer's reversed winding.
    let mut faces = ByteCursor::empty();
    for triangle in indices.chunks_exact(3) {
        faces.write_u16(triangle[2]);
        faces.write_u16(triangle[1]);
        faces.write_u16(triangle[0]);
    }
    streams.indices = faces.into_bytes();

    match kind {
        GarmentKind::Param => {
            let mut morph = ByteCursor::empty();
            let mut flags = ByteCursor::empty();
            for _ in positions {
                morph.write_f32(0.0);
                morph.write_f32(0.0);
                morph.write_f32(0.0);
                flags.write_u16(0);
            }
            streams.morph_offsets = morph.into_bytes();
            streams.garment_flags = flags.into_bytes();
        }
        GarmentKind::Cloth => {
            let has_ext = chunk.skin_weights_ext.is_some();
            let mut base_i = ByteCursor::empty();
            let mut base_w = ByteCursor::empty();
            let mut ext_i = ByteCursor::empty();
            let mut ext_w = ByteCursor::empty();
            for v in 0..positions.len() {
                let vi = skin_indices.get(v);
                let vw = skin_weights.get(v);
                for slot in 0..if has_ext { 8 } else { 4 } {
                    let index = vi.and_then(|i| i.get(slot)).copied().unwrap_or(0) as u8;
                    let weight = vw.and_then(|w| w.get(slot)).copied().unwrap_or(0.0);
                    if slot < 4 {
                        base_i.write_u8(index);
                        base_w.write_f32(weight);
                    } else {
                        ext_i.write_u8(index);
                        ext_w.write_f32(weight);
                    }
                }
            }
            streams.skin_indices = base_i.into_bytes();
            streams.skin_weights = base_w.into_bytes();
            if has_ext {
                streams.skin_indices_ext = ext_i.into_bytes();
                streams.skin_weights_ext = ext_w.into_bytes();
            }
        }
    }
    streams
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_merges_base_and_extension() {
        let indices = vec![1, 2, 3, 4];
        let mut weights = Vec::new();
        for w in [0.4f32, 0.3, 0.2, 0.1] {
            weights.extend_from_slice(&w.to_le_bytes());
        }
        let ext_indices = vec![5, 6, 7, 8];
        let mut ext_weights = Vec::new();
        for w in [0.05f32, 0.04, 0.03, 0.02] {
            ext_weights.extend_from_slice(&w.to_le_bytes());
        }

        let skin = interleave_skin(&indices, &weights, Some(&(ext_indices, ext_weights)), 1);
        assert_eq!(skin.influences, 8);
        assert_eq!(skin.indices, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!((skin.weights[0] - 0.4).abs() < 1e-6);
        assert!((skin.weights[7] - 0.02).abs() < 1e-6);
    }

    #[test]
    fn encoded_faces_reverse_winding() {
        let streams = encode_garment_chunk(
            GarmentKind::Param,
            &GarmentChunk::default(),
            &[[0.0; 3]; 3],
            &[0, 1, 2],
            &[],
            &[],
            &Settings::default(),
        );
        let mut cursor = ByteCursor::new(streams.indices);
        assert_eq!(cursor.read_u16().unwrap(), 2);
        assert_eq!(cursor.read_u16().unwrap(), 1);
        assert_eq!(cursor.read_u16().unwrap(), 0);
    }
}
