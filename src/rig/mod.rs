//! Skeleton load, donor merge and save.
//!
//! Containers store bone transforms in the engine's left-handed, Z-up
//! convention; everything in this module converts to and from a
//! right-handed authoring convention on the way through. Mesh containers
//! embed a partial skeleton with no hierarchy; external rig files carry the
//! full hierarchy and bind poses and can donate ancestor chains to a mesh's
//! partial set ([`merge`]).

pub mod merge;
pub mod transform;
pub mod writer;

use glam::Mat4;

pub use merge::{bone_map, merge_skeletons};
pub use transform::{load_mesh_bones, load_rig, RigPose};
pub use writer::{write_mesh_bones, write_rig};

/// Name of the synthetic root bone unparented bones are rebound to.
pub const SYNTHETIC_ROOT: &str = "SceneRoot";

/// How to handle bones whose declared parent cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPolicy {
    /// Rebind to [`SYNTHETIC_ROOT`] (prepended to the skeleton).
    SyntheticRoot,
    /// Leave unparented.
    LeaveUnparented,
}

/// One bone, transform in authoring space.
#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    /// Parent bone name; `None` marks a root.
    pub parent: Option<String>,
    /// Position in the owning skeleton's bone list.
    pub index: usize,
    /// Model-space (world) transform after conversion.
    pub matrix: Mat4,
}

/// A bone forest, normally one tree under a single root.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Skeleton {
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Bone names in index order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.bones.iter().map(|b| b.name.clone()).collect()
    }

    /// Parent-relative transform of each bone: `parent⁻¹ · world`.
    /// Roots keep their world transform.
    #[must_use]
    pub fn local_matrices(&self) -> Vec<Mat4> {
        self.bones
            .iter()
            .map(|bone| match bone.parent.as_deref().and_then(|p| self.index_of(p)) {
                Some(parent) => self.bones[parent].matrix.inverse() * bone.matrix,
                None => bone.matrix,
            })
            .collect()
    }

    /// Rebuild world transforms from parent-relative ones, in place.
    /// Requires parents to precede children, which holds for every
    /// container-sourced skeleton.
    pub fn compose_from_locals(&mut self, locals: &[Mat4]) {
        for i in 0..self.bones.len() {
            let world = match self.bones[i].parent.as_deref().and_then(|p| self.index_of(p)) {
                Some(parent) if parent < i => self.bones[parent].matrix * locals[i],
                _ => locals[i],
            };
            self.bones[i].matrix = world;
        }
    }

    /// Apply the unresolved-parent policy: every bone whose parent is
    /// absent from this skeleton is rebound to the synthetic root.
    pub fn apply_root_policy(&mut self, policy: RootPolicy) {
        if policy != RootPolicy::SyntheticRoot {
            return;
        }
        let names: std::collections::HashSet<String> =
            self.bones.iter().map(|b| b.name.clone()).collect();
        for bone in &mut self.bones {
            if bone.name == SYNTHETIC_ROOT {
                continue;
            }
            let resolved = bone.parent.as_deref().is_some_and(|p| names.contains(p));
            if !resolved {
                if bone.parent.is_some() {
                    tracing::warn!("bone {} parent unresolved, rebinding to {SYNTHETIC_ROOT}", bone.name);
                }
                bone.parent = Some(SYNTHETIC_ROOT.to_string());
            }
        }
    }

    /// Verify the parent relation is acyclic and, for container-sourced
    /// skeletons, that parents precede children.
    #[must_use]
    pub fn parents_precede_children(&self) -> bool {
        self.bones.iter().enumerate().all(|(i, bone)| {
            match bone.parent.as_deref().and_then(|p| self.index_of(p)) {
                Some(parent) => parent < i,
                None => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn skeleton() -> Skeleton {
        let locals = [
            Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)),
            Mat4::from_rotation_translation(
                Quat::from_rotation_z(0.5),
                Vec3::new(0.0, 0.5, 0.1),
            ),
            Mat4::from_rotation_translation(
                Quat::from_rotation_x(-0.25),
                Vec3::new(0.0, 0.4, 0.0),
            ),
        ];
        let mut skeleton = Skeleton {
            bones: vec![
                Bone { name: "Root".into(), parent: None, index: 0, matrix: Mat4::IDENTITY },
                Bone { name: "Spine".into(), parent: Some("Root".into()), index: 1, matrix: Mat4::IDENTITY },
                Bone { name: "Head".into(), parent: Some("Spine".into()), index: 2, matrix: Mat4::IDENTITY },
            ],
        };
        skeleton.compose_from_locals(&locals);
        skeleton
    }

    fn max_diff(a: Mat4, b: Mat4) -> f32 {
        a.to_cols_array()
            .iter()
            .zip(b.to_cols_array().iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn local_model_round_trip() {
        let skeleton = skeleton();
        let locals = skeleton.local_matrices();
        let mut rebuilt = skeleton.clone();
        rebuilt.compose_from_locals(&locals);
        for (a, b) in skeleton.bones.iter().zip(rebuilt.bones.iter()) {
            assert!(max_diff(a.matrix, b.matrix) < 1e-4);
        }
    }

    #[test]
    fn parent_ordering_invariant() {
        assert!(skeleton().parents_precede_children());
    }

    #[test]
    fn unresolved_parent_rebinds_to_synthetic_root() {
        let mut skeleton = Skeleton {
            bones: vec![
                Bone { name: SYNTHETIC_ROOT.into(), parent: None, index: 0, matrix: Mat4::IDENTITY },
                Bone { name: "Hand".into(), parent: Some("Arm".into()), index: 1, matrix: Mat4::IDENTITY },
            ],
        };
        skeleton.apply_root_policy(RootPolicy::SyntheticRoot);
        assert_eq!(skeleton.bones[1].parent.as_deref(), Some(SYNTHETIC_ROOT));
    }
}
