//! Render blob layout discovery.
//!
//! The render mesh blob serializes, per submesh: a vertex/index count pair,
//! an ordered vertex component list, a five-slot table of byte offsets into
//! the shared vertex buffer, an LOD mask, and (past the first submesh) an
//! index chunk offset. None of it sits at fixed offsets — every field is
//! located by flag scan and its position recorded for write-back.

use crate::cr2w::{find_flag, require_flag, Container, Export, FieldFlag};
use crate::error::{Error, Result};
use crate::io::ByteCursor;

/// Number of byte-offset slots per submesh.
///
/// Slot 0 holds positions+skin, 1 the first UV set, 2 normals/tangents,
/// 3 the second UV set and vertex colors, 4 the vehicle-damage alternate
/// positions.
pub const BYTE_OFFSET_SLOTS: usize = 5;

/// Known vertex component semantics.
///
/// The format names these in each container's string table; resolution to
/// this closed enum happens once at parse time so downstream code never
/// compares strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexSemantic {
    Position,
    TexCoord,
    Normal,
    SkinIndices,
    SkinWeights,
    ExtraData,
    VehicleDmgPosition,
    DestructionIndices,
    Other,
}

impl VertexSemantic {
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "PS_Position" => Self::Position,
            "PS_TexCoord" => Self::TexCoord,
            "PS_Normal" => Self::Normal,
            "PS_SkinIndices" => Self::SkinIndices,
            "PS_SkinWeights" => Self::SkinWeights,
            "PS_ExtraData" => Self::ExtraData,
            "PS_VehicleDmgPosition" => Self::VehicleDmgPosition,
            "PS_DestructionIndices" => Self::DestructionIndices,
            _ => Self::Other,
        }
    }
}

/// One entry of a submesh's vertex layout.
#[derive(Debug, Clone)]
pub struct VertexComponent {
    pub semantic: VertexSemantic,
    /// Semantic name as spelled in the container.
    pub name: String,
    /// Data type name as spelled in the container.
    pub type_name: String,
}

/// A container-absolute field position paired with the value read there.
#[derive(Debug, Clone, Copy)]
pub struct Located<T> {
    pub value: T,
    /// Absolute byte offset of the value, for in-place patching on write.
    pub position: usize,
}

/// Everything the codec needs to know about one submesh.
#[derive(Debug, Clone)]
pub struct SubmeshLayout {
    pub vertex_count: Located<u16>,
    pub index_count: Located<u32>,
    pub components: Vec<VertexComponent>,
    pub byte_offsets: Vec<Located<u32>>,
    pub lod_mask: u8,
    /// Offset of this submesh's indices within the index section.
    pub index_chunk_offset: Located<u32>,
}

impl SubmeshLayout {
    /// Stride of the position slot: the 8-byte quantized position quad plus
    /// 4 bytes per declared skin index/weight component and 8 per extra-data
    /// component.
    #[must_use]
    pub fn position_stride(&self) -> usize {
        let mut stride = 8;
        for component in &self.components {
            match component.semantic {
                VertexSemantic::SkinIndices | VertexSemantic::SkinWeights => stride += 4,
                VertexSemantic::ExtraData => stride += 8,
                _ => {}
            }
        }
        stride
    }

    #[must_use]
    pub fn skin_index_components(&self) -> usize {
        self.components
            .iter()
            .filter(|c| c.semantic == VertexSemantic::SkinIndices)
            .count()
    }

    #[must_use]
    pub fn skin_weight_components(&self) -> usize {
        self.components
            .iter()
            .filter(|c| c.semantic == VertexSemantic::SkinWeights)
            .count()
    }

    #[must_use]
    pub fn has(&self, semantic: VertexSemantic) -> bool {
        self.components.iter().any(|c| c.semantic == semantic)
    }
}

/// Where the shared vertex/index buffer lives.
#[derive(Debug, Clone)]
pub enum RenderBufferSource {
    /// Payload embedded in the render blob itself, starting at this
    /// blob-relative offset.
    Embedded { start: usize, size: usize },
    /// Payload in the buffer table at this index.
    Deferred { buffer_index: usize },
}

/// Per-container quantization frame: i16 position components map to
/// `raw / 32767 * scale + offset` in model space.
#[derive(Debug, Clone, Copy)]
pub struct Quantization {
    pub scale: [f32; 3],
    pub offset: [f32; 3],
}

/// Parsed render mesh blob: quantization, submesh layouts, buffer source.
#[derive(Debug)]
pub struct RenderBlob {
    /// The `rendRenderMeshBlob` export this was read from.
    pub export: Export,
    pub quantization: Quantization,
    /// Absolute offset of the `quantizationScale` flag match, the anchor
    /// for quantization write-back.
    pub quantization_position: usize,
    pub index_buffer_offset: Located<u32>,
    pub submeshes: Vec<SubmeshLayout>,
    pub buffer_source: RenderBufferSource,
}

/// Skip markers that keep scans out of multi-megabyte opaque arrays.
pub struct ScanSkips {
    skips: Vec<FieldFlag>,
}

impl ScanSkips {
    /// Skips for the container kind: mesh containers hide the topology
    /// array, morphtarget containers the per-target entry array, and cloth
    /// meshes a simulation index array.
    #[must_use]
    pub fn for_container(container: &Container) -> Self {
        const MARKERS: [(&str, &str); 3] = [
            ("topology", "array:rendTopologyData"),
            ("targets", "array:MorphTargetMeshEntry"),
            ("simulation", "array:Uint16"),
        ];
        let names = &container.names;
        let mut skips = Vec::new();
        for (field, type_name) in MARKERS {
            if names.contains(field) && names.contains(type_name) {
                if let Ok(flag) = FieldFlag::pair(names, field, type_name) {
                    skips.push(flag);
                }
            }
        }
        Self { skips }
    }

    /// Borrowed view in the shape [`find_flag`] takes.
    #[must_use]
    pub fn as_refs(&self) -> Vec<&FieldFlag> {
        self.skips.iter().collect()
    }
}

impl RenderBlob {
    /// Locate and parse the render mesh blob of a container.
    ///
    /// # Errors
    /// Fails when the export, the quantization frame, or the index buffer
    /// offset is missing (all required); optional fields degrade to
    /// defaults.
    pub fn parse(container: &Container) -> Result<Self> {
        let export = container.require_export("rendRenderMeshBlob")?.clone();
        let mut rm = container.export_cursor(&export);
        let names = &container.names;
        let skips = ScanSkips::for_container(container);
        let skip_refs = skips.as_refs();

        let buffer_source = Self::parse_buffer_source(container, &export, &mut rm, &skip_refs)?;
        // Field scans stop short of an embedded payload; its bytes are not
        // serialized fields and a multi-megabyte walk would only find
        // false positives.
        let bound = match &buffer_source {
            RenderBufferSource::Embedded { start, .. } => *start,
            RenderBufferSource::Deferred { .. } => export.data_size,
        };

        // Quantization frame (required).
        rm.seek(0);
        let scale_flag = FieldFlag::pair(names, "quantizationScale", "Vector4")?;
        let quantization_position =
            export.data_offset + require_flag(&mut rm, &scale_flag, bound, &skip_refs)?;
        let scale = Self::read_vector4(&mut rm)?;

        rm.seek(0);
        let offset_flag = FieldFlag::pair(names, "quantizationOffset", "Vector4")?;
        require_flag(&mut rm, &offset_flag, bound, &skip_refs)?;
        let offset = Self::read_vector4(&mut rm)?;

        let quantization = Quantization {
            scale: [scale[0], scale[1], scale[2]],
            offset: [offset[0], offset[1], offset[2]],
        };

        // Vertex/index counts, one pair per submesh.
        rm.seek(0);
        let count_flag = FieldFlag::pair(names, "numVertices", "Uint16")?;
        let mut counts = Vec::new();
        while find_flag(&mut rm, &count_flag, bound, &skip_refs).is_some() {
            rm.skip(8);
            let vertex_count = Located {
                value: rm.read_u16()?,
                position: export.data_offset + rm.tell() - 2,
            };
            rm.skip(8);
            let index_count = Located {
                value: rm.read_u32()?,
                position: export.data_offset + rm.tell() - 4,
            };
            counts.push((vertex_count, index_count));
        }
        if counts.is_empty() {
            return Err(Error::NoSubmeshes);
        }

        let layouts = Self::parse_vertex_layouts(names, &mut rm, bound, &skip_refs)?;
        let byte_offsets = Self::parse_byte_offsets(names, &export, &mut rm, bound, &skip_refs)?;

        // Index buffer offset (required).
        rm.seek(0);
        let index_offset_flag = FieldFlag::pair(names, "indexBufferOffset", "Uint32")?;
        require_flag(&mut rm, &index_offset_flag, bound, &skip_refs)?;
        rm.skip(8);
        let index_buffer_offset = Located {
            value: rm.read_u32()?,
            position: export.data_offset + rm.tell() - 4,
        };

        // LOD masks.
        rm.seek(0);
        let lod_flag = FieldFlag::pair(names, "lodMask", "Uint8")?;
        let mut lod_masks = Vec::new();
        while find_flag(&mut rm, &lod_flag, bound, &skip_refs).is_some() {
            rm.skip(8);
            lod_masks.push(rm.read_u8()?);
        }

        let chunk_offsets =
            Self::parse_index_chunk_offsets(names, &export, &mut rm, bound, &skip_refs, counts.len())?;

        let mut submeshes = Vec::with_capacity(counts.len());
        for (i, (vertex_count, index_count)) in counts.into_iter().enumerate() {
            let components = layouts.get(i).cloned().unwrap_or_default();
            let offsets = byte_offsets.get(i).cloned().unwrap_or_default();
            submeshes.push(SubmeshLayout {
                vertex_count,
                index_count,
                components,
                byte_offsets: offsets,
                lod_mask: lod_masks.get(i).copied().unwrap_or(0),
                index_chunk_offset: chunk_offsets
                    .get(i)
                    .copied()
                    .unwrap_or(Located { value: 0, position: 0 }),
            });
        }

        Ok(Self {
            export,
            quantization,
            quantization_position,
            index_buffer_offset,
            submeshes,
            buffer_source,
        })
    }

    /// The shared buffer is either embedded (`renderBuffer` DataBuffer with
    /// an inline payload) or deferred, with its 1-based buffer index stored
    /// six bytes before the export's end.
    fn parse_buffer_source(
        container: &Container,
        export: &Export,
        rm: &mut ByteCursor,
        skips: &[&FieldFlag],
    ) -> Result<RenderBufferSource> {
        let flag = FieldFlag::pair(&container.names, "renderBuffer", "DataBuffer").ok();
        rm.seek(0);
        let found = flag
            .as_ref()
            .and_then(|f| find_flag(rm, f, export.data_size, skips))
            .is_some();
        if found {
            rm.skip(4);
            let payload_size = rm.read_u32()? as usize;
            rm.skip(4);
            if payload_size > 8 {
                let start = rm.tell();
                rm.seek(0);
                return Ok(RenderBufferSource::Embedded {
                    start,
                    size: payload_size - 8,
                });
            }
        }
        rm.seek(0);
        let bytes = container.cursor.bytes();
        let pos = export.data_end() - 6;
        if pos + 2 > bytes.len() {
            return Err(Error::corrupt("render buffer index field out of bounds".to_string()));
        }
        let stored = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
        if stored == 0 {
            return Err(Error::corrupt("render buffer index is zero".to_string()));
        }
        Ok(RenderBufferSource::Deferred {
            buffer_index: stored as usize - 1,
        })
    }

    /// Vector4 fields serialize each float behind an 8-byte member header,
    /// 9 bytes past the flag match.
    fn read_vector4(rm: &mut ByteCursor) -> Result<[f32; 4]> {
        rm.skip(9);
        let mut out = [0.0f32; 4];
        for v in &mut out {
            rm.skip(8);
            *v = rm.read_f32()?;
        }
        rm.seek(0);
        Ok(out)
    }

    fn parse_vertex_layouts(
        names: &crate::cr2w::NameTable,
        rm: &mut ByteCursor,
        bound: usize,
        skips: &[&FieldFlag],
    ) -> Result<Vec<Vec<VertexComponent>>> {
        let flag = FieldFlag::pair(names, "vertexLayout", "GpuWrapApiVertexLayoutDesc")?;
        let mut layouts = Vec::new();
        rm.seek(0);
        while find_flag(rm, &flag, bound, skips).is_some() {
            rm.skip(17);
            let component_count = rm.read_i32()?;
            rm.skip(1);

            let mut components = Vec::new();
            for _ in 0..component_count.max(0) {
                rm.skip(8);
                let type_index = rm.read_u16()?;
                rm.skip(8);
                let name_index = rm.read_u16()?;
                if type_index as usize >= names.len() || name_index as usize >= names.len() {
                    break;
                }
                let type_name = names.get(type_index).unwrap_or_default().to_string();
                let name = names.get(name_index).unwrap_or_default().to_string();
                let semantic = VertexSemantic::from_name(&name);
                components.push(VertexComponent {
                    semantic,
                    name,
                    type_name,
                });

                // Component records trail optional streamIndex / usageIndex /
                // streamType members of varying width.
                let mut probe = names.get(rm.read_u16()?).unwrap_or_default();
                if probe == "streamIndex" || probe == "usageIndex" {
                    rm.skip(7);
                    probe = names.get(rm.read_u16()?).unwrap_or_default();
                    if probe == "streamIndex" {
                        rm.skip(7);
                        probe = names.get(rm.read_u16()?).unwrap_or_default();
                        if probe == "streamType" {
                            rm.skip(11);
                        } else {
                            rm.skip(1);
                        }
                    } else if probe == "streamType" {
                        rm.skip(11);
                    } else {
                        rm.skip(1);
                    }
                } else {
                    rm.skip(1);
                }

                if semantic == VertexSemantic::DestructionIndices {
                    rm.skip(22);
                }
            }
            layouts.push(components);
        }
        rm.seek(0);
        Ok(layouts)
    }

    fn parse_byte_offsets(
        names: &crate::cr2w::NameTable,
        export: &Export,
        rm: &mut ByteCursor,
        bound: usize,
        skips: &[&FieldFlag],
    ) -> Result<Vec<Vec<Located<u32>>>> {
        let flag = FieldFlag::pair(names, "byteOffsets", "static:5,Uint32")?;
        let mut all = Vec::new();
        rm.seek(0);
        while find_flag(rm, &flag, bound, skips).is_some() {
            rm.skip(8);
            let count = rm.read_i32()?;
            if count.max(0) as usize != BYTE_OFFSET_SLOTS {
                tracing::warn!("byte offset table holds {count} slots, expected {BYTE_OFFSET_SLOTS}");
            }
            let mut offsets = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count.max(0) {
                offsets.push(Located {
                    value: rm.read_u32()?,
                    position: export.data_offset + rm.tell() - 4,
                });
            }
            all.push(offsets);
        }
        rm.seek(0);
        Ok(all)
    }

    /// Submeshes past the first store their index-section offset in a
    /// `teOffset` member of the index chunk record. A chunk record without
    /// one shares submesh 0's indices.
    fn parse_index_chunk_offsets(
        names: &crate::cr2w::NameTable,
        export: &Export,
        rm: &mut ByteCursor,
        bound: usize,
        skips: &[&FieldFlag],
        submesh_count: usize,
    ) -> Result<Vec<Located<u32>>> {
        let mut offsets = vec![Located { value: 0, position: 0 }];
        if !names.contains("teOffset") {
            if submesh_count > 1 {
                tracing::warn!("submesh index chunk offsets not found");
            }
            return Ok(offsets);
        }
        // "pe" is the tail of the chunk-type member name; the full name is
        // container-dependent, the tail is not.
        let Ok(flag) = FieldFlag::pair(names, "pe", "GpuWrapApieIndexBufferChunkType") else {
            return Ok(offsets);
        };
        rm.seek(0);
        for i in 0..submesh_count {
            if find_flag(rm, &flag, bound, skips).is_none() {
                break;
            }
            let probe = rm.u16_at(rm.tell() + 10)?;
            if (probe as usize) < names.len() && names.get(probe) == Some("teOffset") {
                offsets.push(Located {
                    value: rm.u32_at(rm.tell() + 18)?,
                    position: export.data_offset + rm.tell() + 18,
                });
            } else if i > 0 {
                offsets.push(Located { value: 0, position: 0 });
                tracing::warn!("submesh {i} shares submesh 0's face indices");
            }
            rm.skip(22);
        }
        rm.seek(0);
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantics_resolve_from_names() {
        assert_eq!(VertexSemantic::from_name("PS_Position"), VertexSemantic::Position);
        assert_eq!(VertexSemantic::from_name("PS_SkinIndices"), VertexSemantic::SkinIndices);
        assert_eq!(VertexSemantic::from_name("PS_Whatever"), VertexSemantic::Other);
    }

    #[test]
    fn position_stride_counts_skin_and_extra() {
        let component = |name: &str| VertexComponent {
            semantic: VertexSemantic::from_name(name),
            name: name.to_string(),
            type_name: "PT_UByte4".to_string(),
        };
        let layout = SubmeshLayout {
            vertex_count: Located { value: 0, position: 0 },
            index_count: Located { value: 0, position: 0 },
            components: vec![
                component("PS_Position"),
                component("PS_SkinIndices"),
                component("PS_SkinIndices"),
                component("PS_SkinWeights"),
                component("PS_SkinWeights"),
                component("PS_TexCoord"),
            ],
            byte_offsets: Vec::new(),
            lod_mask: 0,
            index_chunk_offset: Located { value: 0, position: 0 },
        };
        assert_eq!(layout.position_stride(), 8 + 4 * 4);
        assert_eq!(layout.skin_index_components(), 2);
        assert_eq!(layout.skin_weight_components(), 2);
    }
}
