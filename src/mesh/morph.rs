//! Morph target diff decoding.
//!
//! Morph data splits across two deferred buffers: a diff buffer of packed
//! 12-byte records and a mapping buffer of u16 vertex indices pairing each
//! record with the base vertex it displaces. The blob header carries
//! per-target start offsets into both, per-target quantization for the
//! position deltas, and per-target per-chunk record counts.

use crate::cr2w::{find_flag, Container, FieldFlag};
use crate::error::Result;
use crate::io::ByteCursor;

/// Byte stride of one diff record: packed position word, packed normal
/// word, 4 reserved bytes.
const DIFF_RECORD_LEN: usize = 12;

/// Parsed morph blob header.
#[derive(Debug, Default)]
pub struct MorphHeader {
    pub num_targets: u32,
    pub num_diffs: u32,
    pub num_diffs_mapping: u32,
    /// Per-target record offset into the diff buffer, in records.
    pub target_starts_in_diffs: Vec<u32>,
    /// Per-target entry offset into the mapping buffer, in u32 units.
    pub target_starts_in_mapping: Vec<u32>,
    pub position_diff_scale: Vec<[f32; 3]>,
    pub position_diff_offset: Vec<[f32; 3]>,
    /// `[target][chunk]` diff record counts.
    pub diffs_in_chunk: Vec<Vec<u32>>,
    /// `[target][chunk]` mapping pair counts.
    pub mapping_in_chunk: Vec<Vec<u32>>,
    pub diffs_buffer_index: Option<usize>,
    pub mapping_buffer_index: Option<usize>,
}

/// Dense per-chunk deltas for one morph target.
#[derive(Debug, Clone, Default)]
pub struct MorphTargetDiffs {
    pub chunks: Vec<MorphChunkDiffs>,
}

/// Deltas sized to the chunk's vertex count; vertices without a diff stay
/// zero.
#[derive(Debug, Clone, Default)]
pub struct MorphChunkDiffs {
    pub position_deltas: Vec<[f32; 3]>,
    pub normal_deltas: Vec<[f32; 3]>,
}

impl MorphHeader {
    /// Parse the `rendRenderMorphTargetMeshBlob` export.
    ///
    /// Every field is optional in the scan sense; a header with no targets
    /// decodes to no morphs rather than failing.
    ///
    /// # Errors
    /// Only on unreadable container structure, not on absent fields.
    pub fn parse(container: &Container) -> Result<Self> {
        let mut header = Self::default();
        let Some(export) = container.export("rendRenderMorphTargetMeshBlob") else {
            return Ok(header);
        };
        let mut mm = container.export_cursor(export);
        let bound = export.data_size;
        let names = &container.names;

        if let Ok(flag) = FieldFlag::pair(names, "numDiffs", "Uint32") {
            if find_flag(&mut mm, &flag, bound, &[]).is_some() {
                header.num_diffs = mm.u32_at(mm.tell() + 8)?;
            }
            mm.seek(0);
        }
        if let Ok(flag) = FieldFlag::pair(names, "numDiffsMapping", "Uint32") {
            if find_flag(&mut mm, &flag, bound, &[]).is_some() {
                header.num_diffs_mapping = mm.u32_at(mm.tell() + 8)?;
            }
            mm.seek(0);
        }
        if let Ok(flag) = FieldFlag::pair(names, "numTargets", "Uint32") {
            if find_flag(&mut mm, &flag, bound, &[]).is_some() {
                header.num_targets = mm.u32_at(mm.tell() + 8)?;
            }
            mm.seek(0);
        }

        header.target_starts_in_diffs =
            read_u32_array(names, &mut mm, bound, "targetStartsInVertexDiffs")?;
        header.target_starts_in_mapping =
            read_u32_array(names, &mut mm, bound, "targetStartsInVertexDiffsMapping")?;
        header.position_diff_scale =
            read_vector_array(names, &mut mm, bound, "targetPositionDiffScale")?;
        header.position_diff_offset =
            read_vector_array(names, &mut mm, bound, "targetPositionDiffOffset")?;
        header.diffs_in_chunk =
            read_nested_u32_array(names, &mut mm, bound, "numVertexDiffsInEachChunk")?;
        header.mapping_in_chunk =
            read_nested_u32_array(names, &mut mm, bound, "numVertexDiffsMappingInEachChunk")?;

        if let Ok(flag) = FieldFlag::pair(names, "diffsBuffer", "DataBuffer") {
            if find_flag(&mut mm, &flag, bound, &[]).is_some() {
                let diffs = mm.u16_at(mm.tell() + 8)?;
                let mapping = mm.u16_at(mm.tell() + 20)?;
                header.diffs_buffer_index = (diffs > 0).then(|| diffs as usize - 1);
                header.mapping_buffer_index = (mapping > 0).then(|| mapping as usize - 1);
            }
            mm.seek(0);
        }
        Ok(header)
    }
}

fn read_u32_array(
    names: &crate::cr2w::NameTable,
    mm: &mut ByteCursor,
    bound: usize,
    field: &'static str,
) -> Result<Vec<u32>> {
    let Ok(flag) = FieldFlag::pair(names, field, "array:Uint32") else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    if find_flag(mm, &flag, bound, &[]).is_some() {
        let count = mm.u32_at(mm.tell() + 8)?;
        mm.skip(12);
        for _ in 0..count {
            out.push(mm.read_u32()?);
        }
    }
    mm.seek(0);
    Ok(out)
}

/// Vector4 array elements are 51 bytes with the x/y/z floats at +9/+21/+33.
fn read_vector_array(
    names: &crate::cr2w::NameTable,
    mm: &mut ByteCursor,
    bound: usize,
    field: &'static str,
) -> Result<Vec<[f32; 3]>> {
    let Ok(flag) = FieldFlag::pair(names, field, "array:Vector4") else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    if find_flag(mm, &flag, bound, &[]).is_some() {
        let count = mm.u32_at(mm.tell() + 8)?;
        mm.skip(12);
        for _ in 0..count {
            let pos = mm.tell();
            out.push([
                mm.f32_at(pos + 9)?,
                mm.f32_at(pos + 21)?,
                mm.f32_at(pos + 33)?,
            ]);
            mm.seek(pos + 51);
        }
    }
    mm.seek(0);
    Ok(out)
}

fn read_nested_u32_array(
    names: &crate::cr2w::NameTable,
    mm: &mut ByteCursor,
    bound: usize,
    field: &'static str,
) -> Result<Vec<Vec<u32>>> {
    let Ok(flag) = FieldFlag::pair(names, field, "array:array:Uint32") else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    if find_flag(mm, &flag, bound, &[]).is_some() {
        let outer = mm.u32_at(mm.tell() + 8)?;
        mm.skip(12);
        for _ in 0..outer {
            let inner = mm.read_u32()?;
            let mut row = Vec::with_capacity(inner as usize);
            for _ in 0..inner {
                row.push(mm.read_u32()?);
            }
            out.push(row);
        }
    }
    mm.seek(0);
    Ok(out)
}

/// Decode one packed delta component: same 10-bit fields as normals with a
/// slightly shifted bias.
fn delta_component(field: u32) -> f32 {
    (field as f32 - 511.00001) / 512.0
}

/// Reconstruct dense per-chunk deltas for every target.
///
/// `chunk_vertex_counts` sizes the dense output arrays. A missing diff or
/// mapping buffer degrades to no diffs — morphs are an overlay, not a
/// load-bearing part of the mesh.
#[must_use]
pub fn decode_morphs(
    header: &MorphHeader,
    diffs_buffer: Option<&[u8]>,
    mapping_buffer: Option<&[u8]>,
    chunk_vertex_counts: &[usize],
) -> Vec<MorphTargetDiffs> {
    let (Some(diffs_bytes), Some(mapping_bytes)) = (diffs_buffer, mapping_buffer) else {
        tracing::warn!("morph diff or mapping buffer unavailable; decoding no morphs");
        return Vec::new();
    };
    let mut diffs = ByteCursor::new(diffs_bytes.to_vec());
    let mut mapping = ByteCursor::new(mapping_bytes.to_vec());

    let mut targets = Vec::new();
    for t in 0..header.num_targets as usize {
        let (Some(&diff_start), Some(&map_start)) = (
            header.target_starts_in_diffs.get(t),
            header.target_starts_in_mapping.get(t),
        ) else {
            break;
        };
        let scale = header.position_diff_scale.get(t).copied().unwrap_or([1.0; 3]);
        let offset = header.position_diff_offset.get(t).copied().unwrap_or([0.0; 3]);
        let chunk_counts = header.diffs_in_chunk.get(t).cloned().unwrap_or_default();
        let map_counts = header.mapping_in_chunk.get(t).cloned().unwrap_or_default();

        diffs.seek(diff_start as usize * DIFF_RECORD_LEN);
        mapping.seek(map_start as usize * 4);

        let mut target = MorphTargetDiffs::default();
        for (c, &count) in chunk_counts.iter().enumerate() {
            let mut raw_positions = Vec::with_capacity(count as usize);
            let mut raw_normals = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let record_start = diffs.tell();
                let (Ok(position_word), Ok(normal_word)) = (diffs.read_u32(), diffs.read_u32())
                else {
                    break;
                };
                raw_positions.push([
                    delta_component(position_word & 0x3FF) * scale[0] + offset[0],
                    delta_component((position_word >> 10) & 0x3FF) * scale[1] + offset[1],
                    delta_component((position_word >> 20) & 0x3FF) * scale[2] + offset[2],
                ]);
                raw_normals.push([
                    delta_component(normal_word & 0x3FF),
                    delta_component((normal_word >> 10) & 0x3FF),
                    delta_component((normal_word >> 20) & 0x3FF),
                ]);
                diffs.seek(record_start + DIFF_RECORD_LEN);
            }

            let map_pairs = map_counts.get(c).copied().unwrap_or(0) as usize;
            let mut chunk_map = Vec::with_capacity(map_pairs * 2);
            for _ in 0..map_pairs * 2 {
                match mapping.read_u16() {
                    Ok(v) => chunk_map.push(v as usize),
                    Err(_) => break,
                }
            }

            let dense_len = chunk_vertex_counts.get(c).copied().unwrap_or(0);
            let mut chunk = MorphChunkDiffs {
                position_deltas: vec![[0.0; 3]; dense_len],
                normal_deltas: vec![[0.0; 3]; dense_len],
            };
            for (m, &vertex) in chunk_map.iter().enumerate() {
                // An odd diff count leaves a terminator entry at the end of
                // the mapping run; it is not a real vertex index.
                if m == chunk_map.len() - 1 && raw_positions.len() % 2 != 0 {
                    break;
                }
                if m >= raw_positions.len() || vertex >= dense_len {
                    break;
                }
                chunk.position_deltas[vertex] = raw_positions[m];
                chunk.normal_deltas[vertex] = raw_normals[m];
            }
            target.chunks.push(chunk);
        }
        targets.push(target);
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(x: f32, y: f32, z: f32) -> u32 {
        let f = |v: f32| (((v * 512.0) + 511.00001) as u32) & 0x3FF;
        f(x) | (f(y) << 10) | (f(z) << 20)
    }

    #[test]
    fn scatter_places_diffs_at_mapped_indices() {
        let header = MorphHeader {
            num_targets: 1,
            target_starts_in_diffs: vec![0],
            target_starts_in_mapping: vec![0],
            position_diff_scale: vec![[1.0; 3]],
            position_diff_offset: vec![[0.0; 3]],
            diffs_in_chunk: vec![vec![2]],
            mapping_in_chunk: vec![vec![1]],
            ..MorphHeader::default()
        };

        let mut diffs = ByteCursor::empty();
        for _ in 0..2 {
            diffs.write_u32(pack(0.5, 0.0, -0.5));
            diffs.write_u32(pack(0.0, 0.25, 0.0));
            diffs.write_u32(0);
        }
        let mut mapping = ByteCursor::empty();
        mapping.write_u16(3);
        mapping.write_u16(7);

        let decoded = decode_morphs(
            &header,
            Some(diffs.bytes()),
            Some(mapping.bytes()),
            &[10],
        );
        assert_eq!(decoded.len(), 1);
        let chunk = &decoded[0].chunks[0];
        assert_eq!(chunk.position_deltas.len(), 10);
        assert!((chunk.position_deltas[3][0] - 0.5).abs() < 1.0 / 256.0);
        assert!((chunk.position_deltas[7][2] + 0.5).abs() < 1.0 / 256.0);
        assert_eq!(chunk.position_deltas[0], [0.0; 3]);
        assert!((chunk.normal_deltas[3][1] - 0.25).abs() < 1.0 / 256.0);
    }

    #[test]
    fn missing_buffers_decode_to_no_morphs() {
        let header = MorphHeader {
            num_targets: 2,
            ..MorphHeader::default()
        };
        assert!(decode_morphs(&header, None, Some(&[]), &[4]).is_empty());
        assert!(decode_morphs(&header, Some(&[]), None, &[4]).is_empty());
    }
}
