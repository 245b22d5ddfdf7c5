//! Vertex stream codec.
//!
//! Numeric layout per vertex, fixed by the format:
//! - positions: 4×i16, `(raw / 32767) * scale + offset`, fourth component
//!   always 32767; skin index/weight bytes follow inside the same stride
//! - normals/tangents: one packed u32 each, 10-10-10-2 bits,
//!   `(field - 511) / 512`; bit 30 is set on the normal word only
//! - UV set 0: 2×f16; UV set 1: byte RGBA then 2×f16, 8-byte stride
//! - vehicle damage: packed normal u32 then 4×f32 unquantized position
//!
//! Disk axes relate to authoring axes by `(x, y, z) ↔ (-x, z, y)`; the swap
//! is its own inverse and is applied on both directions.

use crate::error::{Error, Result};
use crate::io::ByteCursor;
use crate::settings::Settings;

use super::layout::{Quantization, SubmeshLayout, VertexSemantic};
use super::types::{DamageGeometry, SkinData, SubmeshGeometry};

/// Disk ↔ authoring axis swap; involutive.
#[must_use]
pub fn swap_axes(v: [f32; 3]) -> [f32; 3] {
    [-v[0], v[2], v[1]]
}

/// Map one quantized position to model space (disk axes, unit scale applied).
#[must_use]
pub fn dequantize_position(raw: [i16; 3], q: &Quantization, unit_scale: f32) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for axis in 0..3 {
        out[axis] = (f32::from(raw[axis]) / 32767.0 * q.scale[axis] + q.offset[axis]) * unit_scale;
    }
    out
}

/// Inverse of [`dequantize_position`], truncating like the encoder the
/// format was authored against.
#[must_use]
pub fn quantize_position(v: [f32; 3], q: &Quantization, unit_scale: f32) -> [i16; 3] {
    let mut out = [0i16; 3];
    for axis in 0..3 {
        let scaled = (v[axis] / unit_scale - q.offset[axis]) / q.scale[axis] * 32767.0;
        out[axis] = scaled as i16;
    }
    out
}

/// Unpack a 10-10-10-2 word. The 2-bit field decodes to 0 for every value
/// observed in practice; it is carried through as the fourth component.
#[must_use]
pub fn decode_packed_word(word: u32) -> [f32; 4] {
    let x = ((word & 1023) as f32 - 511.0) / 512.0;
    let y = (((word >> 10) & 1023) as f32 - 511.0) / 512.0;
    let z = (((word >> 20) & 1023) as f32 - 511.0) / 512.0;
    let w = ((word >> 30) as f32 / 127.0).trunc() / 3.0;
    [x, y, z, w]
}

fn pack_component(v: f32) -> u32 {
    // +511.0000001 keeps boundary values from truncating one step low on
    // the round trip.
    ((v * 512.0 + 511.0000001) as i32 as u32) & 1023
}

/// Pack an authoring-space normal: axis swap folded in, sign-marker bit set.
#[must_use]
pub fn encode_normal_word(n: [f32; 3]) -> u32 {
    0x40000000 | pack_component(-n[0]) | (pack_component(n[2]) << 10) | (pack_component(n[1]) << 20)
}

/// Pack an authoring-space tangent: same layout, no marker bit.
#[must_use]
pub fn encode_tangent_word(t: [f32; 3]) -> u32 {
    pack_component(-t[0]) | (pack_component(t[2]) << 10) | (pack_component(t[1]) << 20)
}

fn ensure(buffer: &ByteCursor, offset: usize, needed: usize, submesh: usize) -> Result<()> {
    if offset + needed > buffer.len() {
        return Err(Error::BufferMismatch {
            submesh,
            needed,
            offset,
            available: buffer.len(),
        });
    }
    Ok(())
}

/// Decode one submesh out of the shared vertex/index buffer.
///
/// Components are visited in their declared order; each seeks to its byte
/// offset slot and reads a tightly packed run of `vertex_count` entries.
///
/// # Errors
/// [`Error::BufferMismatch`] when a run would pass the end of the buffer —
/// the usual symptom of pairing a container with the wrong sidecar file.
/// The error covers only this submesh; callers continue with the rest.
pub fn decode_submesh(
    buffer: &mut ByteCursor,
    layout: &SubmeshLayout,
    quantization: &Quantization,
    index_section_offset: u32,
    settings: &Settings,
    submesh_index: usize,
) -> Result<SubmeshGeometry> {
    let mut geometry = SubmeshGeometry {
        submesh_index,
        lod_mask: layout.lod_mask,
        ..SubmeshGeometry::default()
    };

    let index_start = index_section_offset as usize + layout.index_chunk_offset.value as usize;
    geometry.hair_winding = detect_hair_winding(buffer, index_start);

    let mut uv_sets_seen = 0usize;
    for component in &layout.components {
        match component.semantic {
            VertexSemantic::Position => {
                decode_positions(buffer, layout, quantization, settings, &mut geometry)?;
            }
            VertexSemantic::TexCoord => {
                if uv_sets_seen == 0 {
                    decode_uv0(buffer, layout, settings, &mut geometry)?;
                } else if uv_sets_seen == 1 {
                    decode_uv1_and_colors(buffer, layout, settings, &mut geometry)?;
                }
                uv_sets_seen += 1;
            }
            VertexSemantic::Normal => {
                decode_normals(buffer, layout, settings, &mut geometry)?;
            }
            VertexSemantic::VehicleDmgPosition => {
                if settings.import_damage_meshes {
                    decode_damage(buffer, layout, settings, &mut geometry)?;
                }
            }
            _ => {}
        }
    }

    // Face indices for this submesh's chunk.
    let ic = layout.index_count.value as usize;
    ensure(buffer, index_start, ic * 2, submesh_index)?;
    buffer.seek(index_start);
    geometry.indices = Vec::with_capacity(ic);
    for _ in 0..ic {
        geometry.indices.push(buffer.read_u16()?);
    }

    Ok(geometry)
}

/// Hair meshes repeat each leading triangle with the last two indices
/// swapped instead of relying on backward winding.
fn detect_hair_winding(buffer: &mut ByteCursor, index_start: usize) -> bool {
    if index_start + 12 > buffer.len() {
        return false;
    }
    buffer.seek(index_start);
    let mut tri = [0u16; 6];
    for t in &mut tri {
        match buffer.read_u16() {
            Ok(v) => *t = v,
            Err(_) => return false,
        }
    }
    tri[0] == tri[3] && tri[1] == tri[5] && tri[2] == tri[4]
}

fn decode_positions(
    buffer: &mut ByteCursor,
    layout: &SubmeshLayout,
    quantization: &Quantization,
    settings: &Settings,
    geometry: &mut SubmeshGeometry,
) -> Result<()> {
    let vc = layout.vertex_count.value as usize;
    let stride = layout.position_stride();
    let start = layout.byte_offsets.first().map_or(0, |o| o.value as usize);
    ensure(buffer, start, vc * stride, geometry.submesh_index)?;

    let skin_index_bytes = layout.skin_index_components() * 4;
    let skin_weight_bytes = layout.skin_weight_components() * 4;
    let mut skin = (skin_index_bytes > 0).then(|| SkinData {
        influences: skin_index_bytes,
        indices: Vec::with_capacity(vc * skin_index_bytes),
        weights: Vec::with_capacity(vc * skin_weight_bytes),
    });

    geometry.positions = Vec::with_capacity(vc);
    for v in 0..vc {
        let base = start + v * stride;
        buffer.seek(base);
        let raw = [buffer.read_i16()?, buffer.read_i16()?, buffer.read_i16()?];
        let model = dequantize_position(raw, quantization, settings.unit_scale);
        geometry.positions.push(swap_axes(model));

        if let Some(skin) = skin.as_mut() {
            buffer.seek(base + 8);
            for _ in 0..skin_index_bytes {
                skin.indices.push(buffer.read_u8()?);
            }
            for _ in 0..skin_weight_bytes {
                skin.weights.push(f32::from(buffer.read_u8()?) / 255.0);
            }
        }
    }
    geometry.skin = skin;
    Ok(())
}

fn decode_uv0(
    buffer: &mut ByteCursor,
    layout: &SubmeshLayout,
    settings: &Settings,
    geometry: &mut SubmeshGeometry,
) -> Result<()> {
    let vc = layout.vertex_count.value as usize;
    let start = layout.byte_offsets.get(1).map_or(0, |o| o.value as usize);
    ensure(buffer, start, vc * 4, geometry.submesh_index)?;
    buffer.seek(start);
    geometry.uv0 = Vec::with_capacity(vc);
    for _ in 0..vc {
        let u = buffer.read_f16()?;
        let v = buffer.read_f16()?;
        geometry.uv0.push([u, if settings.flip_uvs { 1.0 - v } else { v }]);
    }
    Ok(())
}

fn decode_uv1_and_colors(
    buffer: &mut ByteCursor,
    layout: &SubmeshLayout,
    settings: &Settings,
    geometry: &mut SubmeshGeometry,
) -> Result<()> {
    let vc = layout.vertex_count.value as usize;
    let start = layout.byte_offsets.get(3).map_or(0, |o| o.value as usize);
    ensure(buffer, start, vc * 8, geometry.submesh_index)?;
    buffer.seek(start);
    geometry.uv1 = Vec::with_capacity(vc);
    if settings.vertex_colors {
        geometry.colors = Vec::with_capacity(vc);
    }
    for _ in 0..vc {
        let rgba = [
            buffer.read_u8()?,
            buffer.read_u8()?,
            buffer.read_u8()?,
            buffer.read_u8()?,
        ];
        if settings.vertex_colors {
            geometry.colors.push(rgba);
        }
        let u = buffer.read_f16()?;
        let v = buffer.read_f16()?;
        geometry.uv1.push([u, if settings.flip_uvs { 1.0 - v } else { v }]);
    }
    Ok(())
}

fn decode_normals(
    buffer: &mut ByteCursor,
    layout: &SubmeshLayout,
    settings: &Settings,
    geometry: &mut SubmeshGeometry,
) -> Result<()> {
    let vc = layout.vertex_count.value as usize;
    let start = layout.byte_offsets.get(2).map_or(0, |o| o.value as usize);
    ensure(buffer, start, vc * 8, geometry.submesh_index)?;
    buffer.seek(start);
    geometry.normals = Vec::with_capacity(vc);
    if settings.read_tangents {
        geometry.tangents = Vec::with_capacity(vc);
    }
    for _ in 0..vc {
        let normal_word = buffer.read_u32()?;
        let tangent_word = buffer.read_u32()?;
        let n = decode_packed_word(normal_word);
        geometry.normals.push(swap_axes([n[0], n[1], n[2]]));
        if settings.read_tangents {
            let t = decode_packed_word(tangent_word);
            let swapped = swap_axes([t[0], t[1], t[2]]);
            geometry.tangents.push([swapped[0], swapped[1], swapped[2], t[3]]);
        }
    }
    Ok(())
}

fn decode_damage(
    buffer: &mut ByteCursor,
    layout: &SubmeshLayout,
    settings: &Settings,
    geometry: &mut SubmeshGeometry,
) -> Result<()> {
    let vc = layout.vertex_count.value as usize;
    let start = layout.byte_offsets.get(4).map_or(0, |o| o.value as usize);
    ensure(buffer, start, vc * 20, geometry.submesh_index)?;
    buffer.seek(start);
    let mut damage = DamageGeometry {
        positions: Vec::with_capacity(vc),
        normals: Vec::with_capacity(vc),
    };
    for _ in 0..vc {
        let n = decode_packed_word(buffer.read_u32()?);
        damage.normals.push(swap_axes([n[0], n[1], n[2]]));
        let x = buffer.read_f32()?;
        let y = buffer.read_f32()?;
        let z = buffer.read_f32()?;
        let _w = buffer.read_f32()?;
        // Damage positions store 1/100 of the model unit on top of the
        // usual quantization-free floats.
        let scaled = [
            x * settings.unit_scale * 100.0,
            y * settings.unit_scale * 100.0,
            z * settings.unit_scale * 100.0,
        ];
        damage.positions.push(swap_axes(scaled));
    }
    geometry.damage = Some(damage);
    Ok(())
}
