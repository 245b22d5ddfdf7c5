//! End-to-end tests over synthetic containers.
//!
//! The fixtures build byte-exact CR2W files in memory: real header layout,
//! string/export/buffer tables, a flag-serialized render blob, and an
//! LZ4-framed deferred buffer. Geometry then round-trips through the full
//! decode → encode → decode chain.

use pretty_assertions::assert_eq;

use redmesh::compression::{BlockCompressor, Lz4Compressor};
use redmesh::cr2w::{find_flag, frame_buffer, BufferPatch, Container, FieldFlag, KARK_MAGIC};
use redmesh::host::DiskFileProvider;
use redmesh::io::ByteCursor;
use redmesh::mesh::{decode_mesh, encode_mesh, inspect_mesh, EditedModel, EditedSubmesh};
use redmesh::mesh::vertex::{encode_normal_word, quantize_position};
use redmesh::rig::{load_rig, write_rig};
use redmesh::settings::Settings;

const NAMES: &[&str] = &[
    "",
    "CMesh",
    "rendRenderMeshBlob",
    "renderBuffer",
    "DataBuffer",
    "quantizationScale",
    "quantizationOffset",
    "Vector4",
    "numVertices",
    "Uint16",
    "numIndices",
    "Uint32",
    "vertexLayout",
    "GpuWrapApiVertexLayoutDesc",
    "PS_Position",
    "PS_TexCoord",
    "PS_Normal",
    "PT_UShort4N",
    "PT_Float16_2",
    "PT_Dec4",
    "byteOffsets",
    "static:5,Uint32",
    "indexBufferOffset",
    "lodMask",
    "Uint8",
    "vertexBufferSize",
    "indexBufferSize",
];

fn name_index(name: &str) -> u16 {
    NAMES.iter().position(|n| *n == name).unwrap() as u16
}

fn flag_bytes(a: &str, b: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&name_index(a).to_le_bytes());
    out.extend_from_slice(&name_index(b).to_le_bytes());
    out
}

/// One synthetic submesh: authoring-space geometry plus its LOD mask.
struct TestSubmesh {
    positions: Vec<[f32; 3]>,
    uv0: Vec<[f32; 2]>,
    uv1: Vec<[f32; 2]>,
    colors: Vec<[u8; 4]>,
    normals: Vec<[f32; 3]>,
    indices: Vec<u16>,
    lod_mask: u8,
}

fn triangle_submesh(offset: f32, lod_mask: u8) -> TestSubmesh {
    TestSubmesh {
        positions: vec![
            [10.0 + offset, 20.0, -5.0],
            [-14.0 + offset, 2.5, 30.0],
            [0.5 + offset, -12.0, 8.0],
        ],
        uv0: vec![[0.0, 0.0], [0.5, 0.25], [1.0, 1.0]],
        uv1: vec![[0.25, 0.75], [0.0, 1.0], [0.5, 0.5]],
        colors: vec![[255, 0, 128, 255], [0, 255, 0, 0], [64, 64, 64, 255]],
        normals: vec![[0.0, 0.0, 1.0], [0.7071, 0.7071, 0.0], [-1.0, 0.0, 0.0]],
        indices: vec![0, 1, 2],
        lod_mask,
    }
}

/// Quantization frame used when building fixture buffers.
const Q_SCALE: [f32; 3] = [0.5, 0.5, 0.5];
const Q_OFFSET: [f32; 3] = [0.0, 0.0, 0.1];

/// Serialize one submesh's vertex slots into the shared buffer, returning
/// the five byte-offset slot values.
fn write_vertex_slots(buffer: &mut ByteCursor, submesh: &TestSubmesh, settings: &Settings) -> [u32; 5] {
    let quant = redmesh::mesh::Quantization {
        scale: Q_SCALE,
        offset: Q_OFFSET,
    };
    let mut slots = [0u32; 5];

    slots[0] = buffer.tell() as u32;
    for p in &submesh.positions {
        let q = quantize_position(*p, &quant, settings.unit_scale);
        buffer.write_i16(-q[0]);
        buffer.write_i16(q[2]);
        buffer.write_i16(q[1]);
        buffer.write_i16(32767);
    }

    slots[1] = buffer.tell() as u32;
    for uv in &submesh.uv0 {
        buffer.write_f16(uv[0]);
        buffer.write_f16(uv[1]);
    }

    slots[2] = buffer.tell() as u32;
    for n in &submesh.normals {
        buffer.write_u32(encode_normal_word(*n));
        buffer.write_u32(0);
    }

    slots[3] = buffer.tell() as u32;
    for (uv, color) in submesh.uv1.iter().zip(submesh.colors.iter()) {
        for channel in color {
            buffer.write_u8(*channel);
        }
        buffer.write_f16(uv[0]);
        buffer.write_f16(uv[1]);
    }

    slots[4] = 0;
    slots
}

/// Emit the flag-serialized render blob fields.
fn build_blob(submeshes: &[TestSubmesh], slot_table: &[[u32; 5]], index_offset: u32) -> Vec<u8> {
    let mut blob = ByteCursor::empty();

    // renderBuffer DataBuffer with no inline payload: deferred buffer.
    blob.write_bytes(&flag_bytes("renderBuffer", "DataBuffer"));
    blob.write_u32(0);
    blob.write_u32(0);

    // Vector4 fields: 5 header bytes, four 8+4 float members, 2 tail bytes.
    let vector4 = |blob: &mut ByteCursor, field: &str, values: [f32; 4]| {
        blob.write_bytes(&flag_bytes(field, "Vector4"));
        blob.write_bytes(&[0u8; 5]);
        for v in values {
            blob.write_bytes(&[0u8; 8]);
            blob.write_f32(v);
        }
        blob.write_bytes(&[0u8; 2]);
    };
    // The container stores the frame in disk axes: (x, z, y) with the
    // x offset negated, mirroring the position stream's axis swap.
    vector4(&mut blob, "quantizationScale", [Q_SCALE[0], Q_SCALE[2], Q_SCALE[1], 0.0]);
    vector4(&mut blob, "quantizationOffset", [-Q_OFFSET[0], Q_OFFSET[2], Q_OFFSET[1], 1.0]);

    for submesh in submeshes {
        blob.write_bytes(&flag_bytes("numVertices", "Uint16"));
        blob.write_bytes(&[0u8; 4]);
        blob.write_u16(submesh.positions.len() as u16);
        blob.write_bytes(&[0u8; 8]);
        blob.write_u32(submesh.indices.len() as u32);
    }

    for _ in submeshes {
        blob.write_bytes(&flag_bytes("vertexLayout", "GpuWrapApiVertexLayoutDesc"));
        blob.write_bytes(&[0u8; 13]);
        let components = [
            ("PS_Position", "PT_UShort4N"),
            ("PS_TexCoord", "PT_Float16_2"),
            ("PS_Normal", "PT_Dec4"),
            ("PS_TexCoord", "PT_Float16_2"),
        ];
        blob.write_i32(components.len() as i32);
        blob.write_u8(0);
        for (name, type_name) in components {
            blob.write_bytes(&[0u8; 8]);
            blob.write_u16(name_index(type_name));
            blob.write_bytes(&[0u8; 8]);
            blob.write_u16(name_index(name));
            blob.write_u16(0); // trailing member probe, resolves to ""
            blob.write_u8(0);
        }
    }

    for slots in slot_table {
        blob.write_bytes(&flag_bytes("byteOffsets", "static:5,Uint32"));
        blob.write_bytes(&[0u8; 4]);
        blob.write_i32(5);
        for slot in slots {
            blob.write_u32(*slot);
        }
    }

    // Three consecutive 12-byte Uint32 members; the encoder patches the
    // size fields through their fixed spacing before the offset.
    blob.write_bytes(&flag_bytes("vertexBufferSize", "Uint32"));
    blob.write_u32(4);
    blob.write_u32(index_offset);
    blob.write_bytes(&flag_bytes("indexBufferSize", "Uint32"));
    blob.write_u32(4);
    blob.write_u32(0);
    blob.write_bytes(&flag_bytes("indexBufferOffset", "Uint32"));
    blob.write_u32(4);
    blob.write_u32(index_offset);

    for submesh in submeshes {
        blob.write_bytes(&flag_bytes("lodMask", "Uint8"));
        blob.write_u32(1);
        blob.write_u8(submesh.lod_mask);
    }

    blob.into_bytes()
}

/// Assemble a complete container around the blob and one deferred,
/// LZ4-framed vertex buffer.
fn build_container(submeshes: &[TestSubmesh]) -> Vec<u8> {
    let settings = Settings::default();

    // Shared vertex/index buffer.
    let mut buffer = ByteCursor::empty();
    let mut slot_table = Vec::new();
    for submesh in submeshes {
        slot_table.push(write_vertex_slots(&mut buffer, submesh, &settings));
    }
    let index_offset = buffer.tell() as u32;
    for submesh in &submeshes[..1] {
        for index in &submesh.indices {
            buffer.write_u16(*index);
        }
    }
    let payload = buffer.into_bytes();
    let framed = frame_buffer(&payload, &Lz4Compressor).unwrap();

    let blob = build_blob(submeshes, &slot_table, index_offset);

    // Fixed-layout prologue is 160 bytes in this fixture.
    let string_offset = 160usize;
    let mut strings = ByteCursor::empty();
    for name in NAMES {
        strings.write_bytes(name.as_bytes());
        strings.write_u8(0);
    }
    let string_bytes = strings.into_bytes();
    let string_end = string_offset + string_bytes.len();

    let export_table = string_end;
    let buffer_table = export_table + 2 * 24;
    let data_start = buffer_table + 24;

    let cmesh_offset = data_start;
    let cmesh_size = 16usize;
    let blob_offset = cmesh_offset + cmesh_size;
    // Blob data ends with the 1-based deferred buffer index six bytes
    // before its end.
    let blob_size = blob.len() + 6;
    let data_end = blob_offset + blob_size;

    let mut file = ByteCursor::new(vec![0u8; data_end]);
    file.seek(0);
    file.write_u32(u32::from_le_bytes(*b"CR2W"));
    file.write_u32(195);
    file.write_u32_at(24, data_end as u32);
    file.write_u32_at(40, string_offset as u32);
    file.write_u32_at(44, string_bytes.len() as u32);
    file.write_u32_at(52, string_end as u32);
    file.write_u32_at(88, export_table as u32);
    file.write_u32_at(92, 2);
    file.write_u32_at(100, buffer_table as u32);
    file.write_u32_at(104, 1);
    file.write_u32_at(112, data_start as u32);
    file.write_u32_at(116, 0);

    file.seek(string_offset);
    file.write_bytes(&string_bytes);

    // Export records: {name u16, pad 6, size u32, offset u32, pad 8}.
    file.seek(export_table);
    file.write_u16(name_index("CMesh"));
    file.write_bytes(&[0u8; 6]);
    file.write_u32(cmesh_size as u32);
    file.write_u32(cmesh_offset as u32);
    file.write_bytes(&[0u8; 8]);
    file.write_u16(name_index("rendRenderMeshBlob"));
    file.write_bytes(&[0u8; 6]);
    file.write_u32(blob_size as u32);
    file.write_u32(blob_offset as u32);
    file.write_bytes(&[0u8; 8]);

    // Buffer record: {flags, index, offset, disk, mem, crc}.
    let buffer_offset = data_end;
    file.seek(buffer_table);
    file.write_u32(0);
    file.write_u32(0);
    file.write_u32(buffer_offset as u32);
    file.write_u32(framed.len() as u32);
    file.write_u32(payload.len() as u32);
    file.write_u32(crc32fast_hash(&framed));

    file.seek(blob_offset);
    file.write_bytes(&blob);
    // Deferred buffer index (1-based) at data_end - 6.
    file.write_u16(1);
    file.write_bytes(&[0u8; 4]);

    file.seek(buffer_offset);
    file.write_bytes(&framed);
    let total = file.len() as u32;
    file.write_u32_at(28, total);
    file.into_bytes()
}

fn crc32fast_hash(bytes: &[u8]) -> u32 {
    // The fixture does not depend on the crc32fast crate directly; the
    // value is never validated on read.
    bytes.iter().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(*b)))
}

fn decode(bytes: &[u8], settings: &Settings) -> redmesh::mesh::DecodedMesh {
    let container = Container::parse(bytes.to_vec()).unwrap();
    decode_mesh(
        &container,
        &Lz4Compressor,
        &DiskFileProvider,
        None,
        &[],
        settings,
    )
    .unwrap()
}

#[test]
fn test_header_parse() {
    let bytes = build_container(&[triangle_submesh(0.0, 1)]);
    let container = Container::parse(bytes).unwrap();

    assert_eq!(container.version, 195);
    assert_eq!(container.names.lookup("rendRenderMeshBlob"), Some(2));
    assert_eq!(container.exports.len(), 2);
    assert_eq!(container.exports[0].name, "CMesh");
    assert_eq!(container.buffers.len(), 1);
    assert!(container.buffers[0].is_compressed());

    let report = inspect_mesh(&container).unwrap();
    assert_eq!(report.submesh_count, 1);
    assert_eq!(report.vertex_counts, vec![3]);
    assert_eq!(report.index_counts, vec![3]);
    assert!(!report.rigged);
}

#[test]
fn test_flag_scan_finds_vertex_count() {
    // A name table and a field region holding a literal count of 1024.
    let bytes = build_container(&[triangle_submesh(0.0, 1)]);
    let container = Container::parse(bytes).unwrap();
    let export = container.export("rendRenderMeshBlob").unwrap();
    let mut rm = container.export_cursor(export);

    let flag = FieldFlag::pair(&container.names, "numVertices", "Uint16").unwrap();
    let at = find_flag(&mut rm, &flag, export.data_size, &[]).unwrap();
    assert_eq!(rm.u16_at(at + 8).unwrap(), 3);

    // The same search over a buffer holding vertexCount=1024 right behind
    // the flag lands exactly on it.
    let mut synthetic = ByteCursor::new(vec![0xEE; 40]);
    synthetic.seek(21);
    synthetic.write_bytes(flag.bytes());
    synthetic.write_bytes(&[0u8; 4]);
    synthetic.write_u16(1024);
    let mut cursor = ByteCursor::new(synthetic.into_bytes());
    let at = find_flag(&mut cursor, &flag, 40, &[]).unwrap();
    assert_eq!(at, 21);
    assert_eq!(cursor.u16_at(at + 8).unwrap(), 1024);
}

#[test]
fn test_kark_frame_layout() {
    let framed = frame_buffer(&[7u8; 64], &Lz4Compressor).unwrap();
    let mut cursor = ByteCursor::new(framed);
    assert_eq!(cursor.read_u32().unwrap(), KARK_MAGIC);
    assert_eq!(cursor.read_u32().unwrap(), 64);
}

#[test]
fn test_decode_geometry() {
    let submesh = triangle_submesh(0.0, 1);
    let bytes = build_container(&[triangle_submesh(0.0, 1)]);
    let decoded = decode(&bytes, &Settings::default());

    assert!(decoded.failures.is_empty());
    assert_eq!(decoded.models.len(), 1);
    let geometry = &decoded.models[0].submeshes[0];
    assert_eq!(geometry.positions.len(), 3);
    for (got, want) in geometry.positions.iter().zip(submesh.positions.iter()) {
        for axis in 0..3 {
            // One quantization step of the fixture frame, in scaled units.
            assert!((got[axis] - want[axis]).abs() <= 0.5 / 32767.0 * 100.0 * 2.0 + 1e-3);
        }
    }
    for (got, want) in geometry.normals.iter().zip(submesh.normals.iter()) {
        for axis in 0..3 {
            assert!((got[axis] - want[axis]).abs() <= 1.0 / 512.0 + 1e-5);
        }
    }
    for (got, want) in geometry.uv0.iter().zip(submesh.uv0.iter()) {
        assert!((got[0] - want[0]).abs() < 1e-3 && (got[1] - want[1]).abs() < 1e-3);
    }
    assert_eq!(geometry.colors, submesh.colors);
    assert_eq!(geometry.indices, submesh.indices);
}

#[test]
fn test_lod_buckets_split_models() {
    let bytes = build_container(&[triangle_submesh(0.0, 1), triangle_submesh(20.0, 2)]);

    let split = decode(&bytes, &Settings::default());
    assert_eq!(split.models.len(), 2);
    assert_eq!(split.models[0].lod_mask, 1);
    assert_eq!(split.models[1].lod_mask, 2);

    let merged = decode(
        &bytes,
        &Settings {
            highest_lod_only: false,
            ..Settings::default()
        },
    );
    assert_eq!(merged.models.len(), 1);
    assert_eq!(merged.models[0].submeshes.len(), 2);
}

#[test]
fn test_encode_decode_round_trip() {
    let settings = Settings::default();
    let bytes = build_container(&[triangle_submesh(0.0, 1)]);
    let first = decode(&bytes, &settings);
    let geometry = &first.models[0].submeshes[0];

    let edited = EditedModel {
        bone_names: Vec::new(),
        submeshes: vec![Some(EditedSubmesh {
            positions: geometry.positions.clone(),
            normals: geometry.normals.clone(),
            tangents: vec![[1.0, 0.0, 0.0]; 3],
            uv0: geometry.uv0.clone(),
            uv1: geometry.uv1.clone(),
            colors: geometry
                .colors
                .iter()
                .map(|c| [
                    f32::from(c[0]) / 255.0,
                    f32::from(c[1]) / 255.0,
                    f32::from(c[2]) / 255.0,
                    f32::from(c[3]) / 255.0,
                ])
                .collect(),
            indices: geometry.indices.clone(),
            ..EditedSubmesh::default()
        })],
    };

    let container = Container::parse(bytes).unwrap();
    let encoded = encode_mesh(&container, &edited, &Lz4Compressor, &settings).unwrap();
    assert!(encoded.sidecars.is_empty());

    let second = decode(&encoded.container_bytes, &settings);
    assert!(second.failures.is_empty());
    let result = &second.models[0].submeshes[0];

    for (a, b) in geometry.positions.iter().zip(result.positions.iter()) {
        for axis in 0..3 {
            assert!((a[axis] - b[axis]).abs() < 0.02, "{a:?} vs {b:?}");
        }
    }
    for (a, b) in geometry.normals.iter().zip(result.normals.iter()) {
        for axis in 0..3 {
            assert!((a[axis] - b[axis]).abs() <= 2.0 / 512.0 + 1e-5);
        }
    }
    for (a, b) in geometry.uv0.iter().zip(result.uv0.iter()) {
        assert!((a[0] - b[0]).abs() < 1e-3 && (a[1] - b[1]).abs() < 1e-3);
    }
    for (a, b) in geometry.colors.iter().zip(result.colors.iter()) {
        for channel in 0..4 {
            assert!(i16::from(a[channel]).abs_diff(i16::from(b[channel])) <= 1);
        }
    }
    // The encoder reverses winding for the container convention.
    assert_eq!(result.indices, vec![2, 1, 0]);
}

const RIG_NAMES: &[&str] = &[
    "",
    "animRig",
    "boneNames",
    "array:CName",
    "Root",
    "Spine",
    "Head",
];

fn rig_name_index(name: &str) -> u16 {
    RIG_NAMES.iter().position(|n| *n == name).unwrap() as u16
}

/// A minimal rig container: bone names, parent table behind the `FF FF`
/// sentinel, and 48-byte bind T/R/S records. No A-pose arrays.
fn build_rig_container() -> Vec<u8> {
    let mut data = ByteCursor::empty();

    // boneNames array:CName
    data.write_u16(rig_name_index("boneNames"));
    data.write_u16(rig_name_index("array:CName"));
    data.write_bytes(&[0u8; 4]);
    data.write_i32(3);
    for bone in ["Root", "Spine", "Head"] {
        data.write_u16(rig_name_index(bone));
    }
    data.write_bytes(&[0u8; 6]);

    // Parent table: the root's -1 doubles as the sentinel, Spine's 0 rides
    // in the sentinel's second half, Head parents to Spine.
    data.write_bytes(&[0xFF, 0xFF, 0x00, 0x00]);
    data.write_i16(1);

    // Bind records: vec3 + pad, quat, vec3 + pad.
    let mut bind = |t: [f32; 3], q: [f32; 4]| {
        for v in t {
            data.write_f32(v);
        }
        data.write_u32(0);
        for v in q {
            data.write_f32(v);
        }
        data.write_f32(1.0);
        data.write_f32(1.0);
        data.write_f32(1.0);
        data.write_u32(0);
    };
    bind([0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]);
    bind([0.0, 0.5, 0.1], [0.0, 0.0, 0.2474, 0.96891]);
    bind([0.0, 0.4, 0.0], [-0.12467, 0.0, 0.0, 0.99219]);
    let data = data.into_bytes();

    let string_offset = 160usize;
    let mut strings = ByteCursor::empty();
    for name in RIG_NAMES {
        strings.write_bytes(name.as_bytes());
        strings.write_u8(0);
    }
    let string_bytes = strings.into_bytes();
    let string_end = string_offset + string_bytes.len();

    let export_table = string_end;
    let buffer_table = export_table + 24;
    let data_start = buffer_table;
    let data_end = data_start + data.len();

    let mut file = ByteCursor::new(vec![0u8; data_end]);
    file.seek(0);
    file.write_u32(u32::from_le_bytes(*b"CR2W"));
    file.write_u32(195);
    file.write_u32_at(24, data_end as u32);
    file.write_u32_at(28, data_end as u32);
    file.write_u32_at(40, string_offset as u32);
    file.write_u32_at(44, string_bytes.len() as u32);
    file.write_u32_at(52, string_end as u32);
    file.write_u32_at(88, export_table as u32);
    file.write_u32_at(92, 1);
    file.write_u32_at(100, buffer_table as u32);
    file.write_u32_at(104, 0);
    file.write_u32_at(112, data_start as u32);
    file.write_u32_at(116, 0);

    file.seek(string_offset);
    file.write_bytes(&string_bytes);

    file.seek(export_table);
    file.write_u16(rig_name_index("animRig"));
    file.write_bytes(&[0u8; 6]);
    file.write_u32(data.len() as u32);
    file.write_u32(data_start as u32);
    file.write_bytes(&[0u8; 8]);

    file.seek(data_start);
    file.write_bytes(&data);
    file.into_bytes()
}

#[test]
fn test_rig_load_write_round_trip() {
    let settings = Settings::default();
    let bytes = build_rig_container();

    let container = Container::parse(bytes.clone()).unwrap();
    let (skeleton, _pose) = load_rig(&container, &settings, None).unwrap();
    assert_eq!(skeleton.bones.len(), 3);
    assert_eq!(skeleton.bones[1].parent.as_deref(), Some("Root"));
    assert_eq!(skeleton.bones[2].parent.as_deref(), Some("Spine"));
    assert!(skeleton.parents_precede_children());

    let rewritten = write_rig(bytes, &skeleton, &settings).unwrap();
    let container = Container::parse(rewritten).unwrap();
    let (reloaded, _pose) = load_rig(&container, &settings, None).unwrap();

    for (a, b) in skeleton.bones.iter().zip(reloaded.bones.iter()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.parent, b.parent);
        let ca = a.matrix.to_cols_array();
        let cb = b.matrix.to_cols_array();
        for (x, y) in ca.iter().zip(cb.iter()) {
            assert!((x - y).abs() < 1e-3, "{}: {ca:?} vs {cb:?}", a.name);
        }
    }
}

#[test]
fn test_buffer_cascade_shifts_followers_only() {
    /// Codec with a fixed compressed size, so the cascade delta is exact.
    struct FixedCodec(usize);
    impl BlockCompressor for FixedCodec {
        fn compress(&self, _src: &[u8]) -> redmesh::Result<Vec<u8>> {
            Ok(vec![0xAB; self.0])
        }
        fn decompress(&self, _src: &[u8], expected: usize) -> redmesh::Result<Vec<u8>> {
            Ok(vec![0; expected])
        }
        fn max_compressed_size(&self, len: usize) -> usize {
            len + 8
        }
    }

    // Build a container whose buffer table holds three buffers at known
    // offsets; only descriptor arithmetic matters here.
    let bytes = build_container(&[triangle_submesh(0.0, 1)]);
    let mut container = Container::parse(bytes).unwrap();
    let template = container.buffers[0].clone();
    let mut second = template.clone();
    second.index = 1;
    second.offset = 180;
    second.disk_size = 88;
    second.mem_size = 1000;
    let mut third = template.clone();
    third.index = 2;
    third.offset = 300;
    container.buffers[0].offset = 100;
    container.buffers[0].disk_size = 88;
    container.buffers[0].mem_size = 1000;
    container.buffers.push(second);
    container.buffers.push(third);

    // 1000-byte payload compressed to 120 bytes: 128 framed, was 88 → Δ 40.
    let mut patch = BufferPatch::new(&container);
    patch.replace(0, &[0u8; 1000], &FixedCodec(120)).unwrap();

    let planned = patch.descriptors();
    assert_eq!(planned[0].offset, 100, "replaced buffer keeps its offset");
    assert_eq!(planned[0].disk_size, 128);
    assert_eq!(planned[0].mem_size, 1000);
    assert_eq!(planned[1].offset, 220, "follower at 180 shifts by 40");
    assert_eq!(planned[2].offset, 340, "follower at 300 shifts by 40");
}

#[test]
fn test_sidecar_buffer_fallback() {
    let _ = tracing_subscriber::fmt::try_init();

    // Strip the in-container payload usage by disabling compressed buffers;
    // the decode must come from the paired sidecar file instead.
    let submesh = triangle_submesh(0.0, 1);
    let bytes = build_container(&[triangle_submesh(0.0, 1)]);

    let dir = tempfile::tempdir().unwrap();
    let container_path = dir.path().join("body.mesh");
    std::fs::write(&container_path, &bytes).unwrap();

    // Rebuild the raw payload the same way the fixture did.
    let mut buffer = ByteCursor::empty();
    write_vertex_slots(&mut buffer, &submesh, &Settings::default());
    for index in &submesh.indices {
        buffer.write_u16(*index);
    }
    std::fs::write(dir.path().join("body.mesh.0.buffer"), buffer.bytes()).unwrap();

    let settings = Settings {
        compressed_buffers: false,
        ..Settings::default()
    };
    let container = Container::parse(bytes).unwrap();
    let decoded = decode_mesh(
        &container,
        &Lz4Compressor,
        &DiskFileProvider,
        Some(&container_path),
        &[],
        &settings,
    )
    .unwrap();
    assert!(decoded.failures.is_empty());
    let geometry = &decoded.models[0].submeshes[0];
    assert_eq!(geometry.positions.len(), 3);
    assert_eq!(geometry.indices, submesh.indices);
    // The byte views cover the decoded arrays exactly.
    assert_eq!(geometry.position_bytes().len(), 3 * 12);
    assert_eq!(geometry.index_bytes().len(), 6);
}

#[test]
fn test_wrong_buffer_reports_mismatch_not_abort() {
    // Truncate the deferred buffer: decode keeps the container-level parse
    // and reports the submesh failure.
    let submeshes = [triangle_submesh(0.0, 1)];
    let bytes = build_container(&submeshes);
    let container = Container::parse(bytes).unwrap();

    // Rewrite the buffer with a much smaller payload.
    let mut patch = BufferPatch::new(&container);
    patch.replace(0, &[0u8; 4], &Lz4Compressor).unwrap();
    let truncated = patch.apply(&container, container.cursor.bytes()).unwrap();

    let container = Container::parse(truncated).unwrap();
    let decoded = decode_mesh(
        &container,
        &Lz4Compressor,
        &DiskFileProvider,
        None,
        &[],
        &Settings::default(),
    )
    .unwrap();
    assert_eq!(decoded.failures.len(), 1);
    assert!(matches!(
        decoded.failures[0].1,
        redmesh::Error::BufferMismatch { .. }
    ));
}
