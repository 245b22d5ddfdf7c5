//! Container ↔ authoring transform conversion and skeleton loading.
//!
//! Two fixed rotations bridge the engine convention and the authoring
//! convention: a local re-orientation applied to each bone in place, and a
//! global re-orientation applied in world space. Both are pure axis swaps.
//! The synthetic root (and a rig's own first bone) are exempt.

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::cr2w::{find_flag, Container, FieldFlag};
use crate::error::{Error, Result};
use crate::io::ByteCursor;
use crate::mesh::layout::ScanSkips;
use crate::settings::Settings;

use super::{Bone, RootPolicy, Skeleton, SYNTHETIC_ROOT};

/// In-place re-orientation (right ↔ left handed swap), column convention.
#[must_use]
pub fn local_swap() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, -1.0, 0.0),
        Vec4::new(-1.0, 0.0, 0.0, 0.0),
        Vec4::W,
    )
}

/// World-space re-orientation, column convention.
#[must_use]
pub fn global_swap() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(-1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::W,
    )
}

/// Convert a rig bone's composed world transform to authoring space.
#[must_use]
pub fn reorient_world(world: Mat4) -> Mat4 {
    global_swap() * (world * local_swap().inverse())
}

/// Convert a mesh-embedded bind matrix (world-to-bone) to an authoring
/// world transform: inversion and re-orientation in one step.
#[must_use]
pub fn reorient_bind(bind: Mat4) -> Mat4 {
    global_swap() * (bind.inverse() * local_swap())
}

/// Which pose array a rig's transforms were taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigPose {
    /// `aPoseMS`, highest precedence.
    ModelSpace,
    /// `aPoseLS`, used when no model-space pose exists.
    LocalSpace,
    /// The bind-pose T/R/S records, the fallback.
    BindPose,
}

/// Raw bind matrices of a mesh skeleton, kept for anchoring donor-rig
/// chains to the mesh's own pose.
#[derive(Debug, Clone, Default)]
pub struct RawBindAnchor {
    pub names: Vec<String>,
    /// Unconverted bind matrices (column convention), translation unscaled.
    pub matrices: Vec<Mat4>,
}

impl RawBindAnchor {
    /// Parent anchor for a bone whose parent is a mesh bone: the inverted
    /// bind with its translation brought to authoring units.
    #[must_use]
    pub fn parent_matrix(&self, name: &str, unit_scale: f32) -> Option<Mat4> {
        let index = self.names.iter().position(|n| n == name)?;
        let mut m = self.matrices[index].inverse();
        let t = m.w_axis;
        m.w_axis = Vec4::new(t.x * unit_scale, t.y * unit_scale, t.z * unit_scale, t.w);
        Some(m)
    }
}

/// A mesh container's embedded partial skeleton.
#[derive(Debug)]
pub struct MeshBones {
    pub skeleton: Skeleton,
    pub anchor: RawBindAnchor,
    pub pose: RigPose,
}

/// One T/R/S record as stored in rig files.
#[derive(Debug, Clone, Copy)]
struct TransRotScale {
    translation: Vec3,
    rotation: Quat,
    scale: Vec3,
}

/// Serialized `QsTransform` array element: three float quads behind member
/// headers, 59 + 59 + 62 bytes.
fn read_qs_transform(cursor: &mut ByteCursor) -> Result<TransRotScale> {
    let mut pos = cursor.tell();
    let translation = Vec3::new(
        cursor.f32_at(pos + 18)?,
        cursor.f32_at(pos + 30)?,
        cursor.f32_at(pos + 42)?,
    );
    pos += 59;
    let rotation = Quat::from_xyzw(
        cursor.f32_at(pos + 18)?,
        cursor.f32_at(pos + 30)?,
        cursor.f32_at(pos + 42)?,
        cursor.f32_at(pos + 54)?,
    )
    .conjugate();
    pos += 59;
    let scale = Vec3::new(
        cursor.f32_at(pos + 18)?,
        cursor.f32_at(pos + 30)?,
        cursor.f32_at(pos + 42)?,
    );
    cursor.seek(pos + 62);
    Ok(TransRotScale {
        translation,
        rotation,
        scale,
    })
}

/// Bind-pose record: vec3 + pad, quat, vec3 + pad — 48 bytes.
fn read_bind_transform(cursor: &mut ByteCursor) -> Result<TransRotScale> {
    let translation = Vec3::new(cursor.read_f32()?, cursor.read_f32()?, cursor.read_f32()?);
    cursor.skip(4);
    let rotation = Quat::from_xyzw(
        cursor.read_f32()?,
        cursor.read_f32()?,
        cursor.read_f32()?,
        cursor.read_f32()?,
    )
    .conjugate();
    let scale = Vec3::new(cursor.read_f32()?, cursor.read_f32()?, cursor.read_f32()?);
    cursor.skip(4);
    Ok(TransRotScale {
        translation,
        rotation,
        scale,
    })
}

fn read_qs_transform_array(
    container: &Container,
    cursor: &mut ByteCursor,
    bound: usize,
    field: &'static str,
) -> Result<Option<Vec<TransRotScale>>> {
    if !container.names.contains(field) {
        return Ok(None);
    }
    let flag = FieldFlag::pair(&container.names, field, "array:QsTransform")?;
    cursor.seek(0);
    if find_flag(cursor, &flag, bound, &[]).is_none() {
        cursor.seek(0);
        return Ok(None);
    }
    cursor.skip(8);
    let count = cursor.read_u32()?;
    let mut poses = Vec::with_capacity(count as usize);
    for _ in 0..count {
        poses.push(read_qs_transform(cursor)?);
    }
    cursor.seek(0);
    Ok(Some(poses))
}

/// Compose one bone's matrix from its stored T/R/S: rotation+translation,
/// then world scale, column convention.
fn bone_matrix(trs: &TransRotScale, unit_scale: f32) -> Mat4 {
    Mat4::from_scale(trs.scale)
        * Mat4::from_rotation_translation(trs.rotation, trs.translation * unit_scale)
}

/// Load an external rig file's skeleton, converted to authoring space.
///
/// Pose precedence: model-space A-pose, then local-space A-pose, then the
/// bind pose. When `anchor` is given, bones whose parent belongs to the
/// mesh skeleton compose against the mesh's own bind pose instead of the
/// rig pose, so donated chains line up with the mesh.
///
/// # Errors
/// Fails when the bone-name table is missing or records are truncated.
pub fn load_rig(
    container: &Container,
    settings: &Settings,
    anchor: Option<&RawBindAnchor>,
) -> Result<(Skeleton, RigPose)> {
    let names = &container.names;
    let mut cursor = ByteCursor::new(
        container.cursor.bytes()[container.scan_start..].to_vec(),
    );
    let bound = container
        .scan_bound
        .saturating_sub(container.scan_start)
        .min(cursor.len());

    // Bone names.
    let bone_names_flag = FieldFlag::pair(names, "boneNames", "array:CName")?;
    if find_flag(&mut cursor, &bone_names_flag, bound, &[]).is_none() {
        return Err(Error::FieldNotFound { field: "boneNames" });
    }
    cursor.skip(8);
    let bone_count = cursor.read_i32()?.max(0) as usize;
    let mut bone_names = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        let index = cursor.read_u16()?;
        bone_names.push(names.get(index).unwrap_or_default().to_string());
    }
    cursor.seek(0);

    // Pose arrays, by precedence.
    let model_space = read_qs_transform_array(container, &mut cursor, bound, "aPoseMS")?;
    let local_space = read_qs_transform_array(container, &mut cursor, bound, "aPoseLS")?;

    // Parent table: the first root's -1 parent doubles as the sentinel.
    let sentinel = FieldFlag::literal("boneParents", &[0xFF, 0xFF, 0x00, 0x00]);
    let cursor_len = cursor.len();
    if find_flag(&mut cursor, &sentinel, cursor_len, &[]).is_none() {
        return Err(Error::FieldNotFound { field: "boneParents" });
    }
    let mut parents = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        parents.push(cursor.read_i16()?);
    }

    // Bind pose records follow the parent table directly.
    let mut bind_poses = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        bind_poses.push(read_bind_transform(&mut cursor)?);
    }

    let (poses, pose_kind) = match (model_space, local_space) {
        (Some(ms), _) if ms.len() == bone_count => (ms, RigPose::ModelSpace),
        (_, Some(ls)) if ls.len() == bone_count => (ls, RigPose::LocalSpace),
        _ => (bind_poses, RigPose::BindPose),
    };

    // Compose world transforms parent-before-child; the format guarantees
    // parent indices are numerically smaller.
    let mut skeleton = Skeleton::default();
    for (b, trs) in poses.iter().enumerate() {
        let mut matrix = bone_matrix(trs, settings.unit_scale);
        let parent = if b == 0 {
            None
        } else {
            let parent_index = parents[b].max(0) as usize;
            if parent_index >= b {
                return Err(Error::corrupt(format!(
                    "rig bone {b} parent {parent_index} does not precede it"
                )));
            }
            let parent_name = &bone_names[parent_index];
            matrix = match anchor.and_then(|a| a.parent_matrix(parent_name, settings.unit_scale)) {
                Some(mesh_parent) => mesh_parent * matrix,
                None => skeleton.bones[parent_index].matrix * matrix,
            };
            Some(parent_name.clone())
        };
        skeleton.bones.push(Bone {
            name: bone_names[b].clone(),
            parent,
            index: b,
            matrix,
        });
    }

    for bone in skeleton.bones.iter_mut().skip(1) {
        bone.matrix = reorient_world(bone.matrix);
    }

    Ok((skeleton, pose_kind))
}

/// Load a mesh container's embedded partial skeleton.
///
/// The bone records carry no hierarchy; every bone starts unparented and
/// the root policy (and any later donor merge) fills parents in. Returns
/// `None` for unrigged containers.
///
/// # Errors
/// Fails only on truncated records.
pub fn load_mesh_bones(container: &Container, settings: &Settings) -> Result<Option<MeshBones>> {
    if !container.names.contains("boneRigMatrices") {
        return Ok(None);
    }
    let is_morphtarget = container.export("MorphTargetMesh").is_some();
    let export = if is_morphtarget {
        container.require_export("MorphTargetMesh")?
    } else {
        container.require_export("CMesh")?
    };
    let mut cm = container.export_cursor(export);
    let bound = export.data_size;
    let skips_store;
    let skips: Vec<&FieldFlag> = if is_morphtarget {
        Vec::new()
    } else {
        skips_store = ScanSkips::for_container(container);
        skips_store.as_refs()
    };

    let names_flag = FieldFlag::pair(&container.names, "boneNames", "array:CName")?;
    if find_flag(&mut cm, &names_flag, bound, &skips).is_none() {
        return Ok(None);
    }
    cm.skip(8);
    let bone_count = cm.read_u32()? as usize;
    let mut bone_names = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        let index = cm.read_u16()?;
        bone_names.push(container.names.get(index).unwrap_or_default().to_string());
    }
    cm.seek(0);

    let matrices_flag = FieldFlag::pair(&container.names, "boneRigMatrices", "array:Matrix")?;
    if find_flag(&mut cm, &matrices_flag, bound, &skips).is_none() {
        return Ok(None);
    }
    cm.skip(4);
    let _section_size = cm.read_u32()?;

    // 239-byte bone records: 3 lead bytes, then 4 rows of 11 lead bytes
    // plus 4 headed floats.
    let mut raw = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        cm.skip(3);
        let mut rows = [[0.0f32; 4]; 4];
        for row in &mut rows {
            cm.skip(11);
            for value in row.iter_mut() {
                cm.skip(8);
                *value = cm.read_f32()?;
            }
        }
        // File rows become columns: row-vector storage to column convention.
        raw.push(Mat4::from_cols(
            Vec4::from_array(rows[0]),
            Vec4::from_array(rows[1]),
            Vec4::from_array(rows[2]),
            Vec4::from_array(rows[3]),
        ));
    }

    let mut anchor = RawBindAnchor::default();
    let mut skeleton = Skeleton::default();
    if settings.parent_to_root {
        anchor.names.push(SYNTHETIC_ROOT.to_string());
        anchor.matrices.push(Mat4::IDENTITY);
        skeleton.bones.push(Bone {
            name: SYNTHETIC_ROOT.to_string(),
            parent: None,
            index: 0,
            matrix: Mat4::IDENTITY,
        });
    }

    for (name, bind) in bone_names.iter().zip(raw.iter()) {
        let mut scaled = *bind;
        let t = scaled.w_axis;
        scaled.w_axis = Vec4::new(
            t.x * settings.unit_scale,
            t.y * settings.unit_scale,
            t.z * settings.unit_scale,
            t.w,
        );
        let index = skeleton.bones.len();
        anchor.names.push(name.clone());
        anchor.matrices.push(*bind);
        skeleton.bones.push(Bone {
            name: name.clone(),
            parent: None,
            index,
            matrix: reorient_bind(scaled),
        });
    }

    if settings.parent_to_root {
        skeleton.apply_root_policy(RootPolicy::SyntheticRoot);
    }

    Ok(Some(MeshBones {
        skeleton,
        anchor,
        pose: RigPose::BindPose,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_diff(a: Mat4, b: Mat4) -> f32 {
        a.to_cols_array()
            .iter()
            .zip(b.to_cols_array().iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn swaps_are_pure_rotations() {
        for m in [local_swap(), global_swap()] {
            assert!((m.determinant().abs() - 1.0).abs() < 1e-6);
            assert!(max_diff(m * m.inverse(), Mat4::IDENTITY) < 1e-6);
        }
    }

    #[test]
    fn reorient_world_is_invertible() {
        let world = Mat4::from_rotation_translation(
            Quat::from_rotation_y(0.7),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let converted = reorient_world(world);
        // Inverse of G * (W * L⁻¹) recovers W.
        let back = global_swap().inverse() * converted * local_swap();
        assert!(max_diff(back, world) < 1e-5);
    }
}
