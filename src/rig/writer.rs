//! Skeleton save path: the exact inverse of [`super::transform`].
//!
//! Bone matrices are stripped of the authoring re-orientation, expressed
//! relative to their parent where the destination stores parent-relative
//! transforms, decomposed to translation/quaternion/scale, and written only
//! into slots whose bone exists in both skeletons — unmatched slots are
//! left untouched. The rig's own first bone never carried the
//! re-orientation on load, so it is written back without one.

use glam::{Mat3, Mat4, Quat, Vec3};

use crate::cr2w::{find_flag, Container, FieldFlag};
use crate::error::{Error, Result};
use crate::io::ByteCursor;
use crate::mesh::layout::ScanSkips;
use crate::settings::Settings;

use super::transform::{global_swap, local_swap};
use super::Skeleton;

/// Undo the load-time re-orientation: `G⁻¹ · W · L`.
fn unreorient_world(world: Mat4) -> Mat4 {
    global_swap().inverse() * world * local_swap()
}

/// One bone's transform prepared for rig write-back.
#[derive(Debug, Clone, Copy)]
struct RigTrs {
    translation: [f32; 4],
    rotation: [f32; 4],
    scale: [f32; 4],
}

/// Decompose a composed `scale · (rotation + translation)` matrix back into
/// the stored representation: per-row scale magnitudes, row-normalized
/// rotation (conjugated for storage), translation divided by scale and the
/// authoring unit.
fn decompose(m: Mat4, inv_unit: f32) -> RigTrs {
    let scale = Vec3::new(
        m.row(0).truncate().length().max(f32::EPSILON),
        m.row(1).truncate().length().max(f32::EPSILON),
        m.row(2).truncate().length().max(f32::EPSILON),
    );

    // Rows carry the scale; normalize them to isolate the rotation.
    let rows = Mat3::from_mat4(m).transpose();
    let rotation3 = Mat3::from_cols(
        rows.x_axis / scale.x,
        rows.y_axis / scale.y,
        rows.z_axis / scale.z,
    )
    .transpose();
    let rotation = Quat::from_mat3(&rotation3).normalize().conjugate();

    let t = m.w_axis;
    RigTrs {
        translation: [
            t.x / scale.x * inv_unit,
            t.y / scale.y * inv_unit,
            t.z / scale.z * inv_unit,
            0.0,
        ],
        rotation: [rotation.x, rotation.y, rotation.z, rotation.w],
        scale: [scale.x, scale.y, scale.z, 1.0],
    }
}

/// Per rig slot: the stored (parent-relative where parented) transform for
/// the skeleton bone matching that slot, or `None` when the skeleton has
/// no such bone.
fn slot_transforms(
    rig_bone_names: &[String],
    skeleton: &Skeleton,
    settings: &Settings,
) -> Vec<Option<RigTrs>> {
    // Raw (container-convention) world matrices per slot. Slot 0 never had
    // the re-orientation applied on load.
    let raw: Vec<Option<Mat4>> = rig_bone_names
        .iter()
        .enumerate()
        .map(|(slot, name)| {
            skeleton.index_of(name).map(|index| {
                let world = skeleton.bones[index].matrix;
                if slot == 0 {
                    world
                } else {
                    unreorient_world(world)
                }
            })
        })
        .collect();

    let inv_unit = settings.inv_unit_scale();
    rig_bone_names
        .iter()
        .enumerate()
        .map(|(slot, name)| {
            let world = raw[slot]?;
            let parent_slot = skeleton
                .index_of(name)
                .and_then(|index| skeleton.bones[index].parent.as_deref())
                .and_then(|parent| rig_bone_names.iter().position(|n| n == parent));
            let local = match parent_slot.and_then(|p| raw[p]) {
                Some(parent_world) => parent_world.inverse() * world,
                None => world,
            };
            Some(decompose(local, inv_unit))
        })
        .collect()
}

/// Write one `QsTransform` slot: translation/rotation/scale quads at the
/// member-header offsets used on load.
fn write_qs_slot(out: &mut ByteCursor, pos: usize, trs: &RigTrs) {
    out.write_f32_at(pos + 18, trs.translation[0]);
    out.write_f32_at(pos + 30, trs.translation[1]);
    out.write_f32_at(pos + 42, trs.translation[2]);
    let rot_pos = pos + 59;
    out.write_f32_at(rot_pos + 18, trs.rotation[0]);
    out.write_f32_at(rot_pos + 30, trs.rotation[1]);
    out.write_f32_at(rot_pos + 42, trs.rotation[2]);
    out.write_f32_at(rot_pos + 54, trs.rotation[3]);
    let scale_pos = pos + 118;
    out.write_f32_at(scale_pos + 18, trs.scale[0]);
    out.write_f32_at(scale_pos + 30, trs.scale[1]);
    out.write_f32_at(scale_pos + 42, trs.scale[2]);
}

fn patch_pose_array(
    out: &mut ByteCursor,
    container: &Container,
    scan_start: usize,
    field: &'static str,
    transforms: &[Option<RigTrs>],
) -> Result<()> {
    if !container.names.contains(field) {
        return Ok(());
    }
    let flag = FieldFlag::pair(&container.names, field, "array:QsTransform")?;
    let mut scan = ByteCursor::new(out.bytes()[scan_start..].to_vec());
    let scan_len = scan.len();
    if find_flag(&mut scan, &flag, scan_len, &[]).is_none() {
        return Ok(());
    }
    scan.skip(8);
    let count = scan.read_i32()?.max(0) as usize;
    let mut record = scan_start + scan.tell();
    for trs in transforms.iter().take(count) {
        if let Some(trs) = trs {
            write_qs_slot(out, record, trs);
        }
        record += 180;
    }
    Ok(())
}

/// Write a skeleton's bone transforms over a rig file's pose arrays, parent
/// table and bind records, producing the patched rig bytes.
///
/// # Errors
/// Fails when the rig is not a valid container or lacks a bone-name table.
pub fn write_rig(rig_bytes: Vec<u8>, skeleton: &Skeleton, settings: &Settings) -> Result<Vec<u8>> {
    let container = Container::parse(rig_bytes)?;
    let scan_start = container.scan_start;
    let mut out = ByteCursor::new(container.cursor.bytes().to_vec());

    // Destination bone names.
    let names_flag = FieldFlag::pair(&container.names, "boneNames", "array:CName")?;
    let mut scan = ByteCursor::new(out.bytes()[scan_start..].to_vec());
    let scan_len = scan.len();
    if find_flag(&mut scan, &names_flag, scan_len, &[]).is_none() {
        return Err(Error::FieldNotFound { field: "boneNames" });
    }
    scan.skip(8);
    let bone_count = scan.read_i32()?.max(0) as usize;
    let mut rig_bone_names = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        let index = scan.read_u16()?;
        rig_bone_names.push(container.names.get(index).unwrap_or_default().to_string());
    }

    let transforms = slot_transforms(&rig_bone_names, skeleton, settings);

    patch_pose_array(&mut out, &container, scan_start, "aPoseLS", &transforms)?;
    patch_pose_array(&mut out, &container, scan_start, "aPoseMS", &transforms)?;

    // Parent table, then the 48-byte bind records right behind it.
    let sentinel = FieldFlag::literal("boneParents", &[0xFF, 0xFF, 0x00, 0x00]);
    let mut scan = ByteCursor::new(out.bytes()[scan_start..].to_vec());
    let scan_len = scan.len();
    let Some(parents_pos) = find_flag(&mut scan, &sentinel, scan_len, &[]) else {
        return Err(Error::FieldNotFound { field: "boneParents" });
    };

    let mut record = scan_start + parents_pos;
    for name in &rig_bone_names {
        let parent_slot = skeleton
            .index_of(name)
            .and_then(|i| skeleton.bones[i].parent.as_deref())
            .and_then(|parent| rig_bone_names.iter().position(|n| n == parent));
        if let Some(parent_index) = parent_slot {
            out.write_u16_at(record, parent_index as u16);
        }
        record += 2;
    }

    // Bind T/R/S records. Rotation slots are left alone when an A-pose
    // array exists; the pose arrays carry the rotations then.
    record = scan_start + parents_pos + 2 * bone_count;
    let write_rotation = !container.names.contains("aPoseLS");
    for trs in &transforms {
        if let Some(trs) = trs {
            for (k, quad) in [trs.translation, trs.rotation, trs.scale].iter().enumerate() {
                if k == 1 && !write_rotation {
                    continue;
                }
                for (j, value) in quad.iter().enumerate() {
                    out.write_f32_at(record + (k * 4 + j) * 4, *value);
                }
            }
        }
        record += 48;
    }

    Ok(out.into_bytes())
}

/// Overwrite a mesh container's embedded bind matrices with bone positions
/// from an edited skeleton, in place on the output cursor.
///
/// # Errors
/// Fails when the container has no embedded skeleton.
pub fn write_mesh_bones(
    out: &mut ByteCursor,
    container: &Container,
    skeleton: &Skeleton,
    settings: &Settings,
) -> Result<()> {
    let export = container.require_export("CMesh")?;
    let mut cm = container.export_cursor(export);
    let bound = export.data_size;
    let skips_store = ScanSkips::for_container(container);
    let skips = skips_store.as_refs();

    let names_flag = FieldFlag::pair(&container.names, "boneNames", "array:CName")?;
    if find_flag(&mut cm, &names_flag, bound, &skips).is_none() {
        return Err(Error::FieldNotFound { field: "boneNames" });
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
        return Err(Error::FieldNotFound { field: "boneRigMatrices" });
    }
    cm.skip(8);
    let _matrix_count = cm.read_u32()?;
    let base = export.data_offset + cm.tell();

    let inv_unit = settings.inv_unit_scale();
    let local = local_swap();
    let global = global_swap();

    for (i, name) in bone_names.iter().enumerate() {
        let Some(index) = skeleton.index_of(name) else {
            tracing::warn!("no match for bone {name} in edited skeleton");
            continue;
        };
        // Inverse of the load conversion: bind = L · W⁻¹ · G, the file
        // storing its rows with the translation row in authoring units
        // divided back out.
        let bind = local * skeleton.bones[index].matrix.inverse() * global;
        let record = base + i * 239 + 18;

        let write_triple = |out: &mut ByteCursor, at: usize, v: [f32; 3]| {
            out.write_f32_at(at, v[0]);
            out.write_f32_at(at + 12, v[1]);
            out.write_f32_at(at + 24, v[2]);
        };
        let c0 = bind.x_axis;
        let c1 = bind.y_axis;
        let c2 = bind.z_axis;
        let t = bind.w_axis;
        write_triple(out, record, [c0.x, c0.y, c0.z]);
        write_triple(out, record + 59, [c1.x, c1.y, c1.z]);
        write_triple(out, record + 118, [c2.x, c2.y, c2.z]);
        write_triple(
            out,
            record + 177,
            [t.x * inv_unit, t.y * inv_unit, t.z * inv_unit],
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::Bone;

    #[test]
    fn root_slot_round_trips_without_reorientation() {
        let world = Mat4::from_translation(Vec3::new(100.0, 50.0, 0.0));
        let skeleton = Skeleton {
            bones: vec![Bone {
                name: "Root".into(),
                parent: None,
                index: 0,
                matrix: world,
            }],
        };
        let transforms = slot_transforms(
            &["Root".to_string()],
            &skeleton,
            &Settings::default(),
        );
        let trs = transforms[0].unwrap();
        assert!((trs.translation[0] - 1.0).abs() < 1e-6);
        assert!((trs.translation[1] - 0.5).abs() < 1e-6);
        assert!((trs.rotation[3] - 1.0).abs() < 1e-6, "identity rotation");
        assert!((trs.scale[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn decompose_recovers_scale_and_translation() {
        let m = Mat4::from_scale(Vec3::new(2.0, 3.0, 4.0))
            * Mat4::from_rotation_translation(
                Quat::from_rotation_z(0.3),
                Vec3::new(10.0, -20.0, 30.0),
            );
        let trs = decompose(m, 1.0);
        assert!((trs.scale[0] - 2.0).abs() < 1e-5);
        assert!((trs.scale[1] - 3.0).abs() < 1e-5);
        assert!((trs.scale[2] - 4.0).abs() < 1e-5);
        assert!((trs.translation[0] - 10.0).abs() < 1e-4);
        assert!((trs.translation[1] + 20.0).abs() < 1e-4);
        assert!((trs.translation[2] - 30.0).abs() < 1e-4);
    }
}
