//! Donor-rig merge.
//!
//! A mesh's embedded skeleton is partial: it lists only the bones its
//! vertices skin to. Connecting those to a common root takes ancestor
//! bones from an external rig. The merge keeps every mesh bone, walks each
//! missing parent up the donor's chain collecting only bones the mesh does
//! not have, and stops at the first bone already present (or gives up on
//! the chain unless chains are allowed to dangle off the donor root).

use std::collections::HashSet;

use crate::settings::Settings;

use super::{Bone, RootPolicy, Skeleton, SYNTHETIC_ROOT};

/// Merge a donor rig's bones into the mesh's partial skeleton.
///
/// Mesh bones come first, in their own order; donated ancestor chains are
/// spliced in front of the bone that needed them. Every bone's `index` is
/// reassigned to its merged position. Unparented bones fall back to the
/// synthetic root when the settings ask for it.
#[must_use]
pub fn merge_skeletons(mesh: &Skeleton, donor: &Skeleton, settings: &Settings) -> Skeleton {
    let mesh_names: HashSet<&str> = mesh.bones.iter().map(|b| b.name.as_str()).collect();

    // Candidate names: mesh order first, then donor-only names (reachable
    // only through chains).
    let mut candidates: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for bone in mesh.bones.iter().chain(donor.bones.iter()) {
        if seen.insert(bone.name.as_str()) {
            candidates.push(bone.name.as_str());
        }
    }
    let candidate_set: HashSet<&str> = candidates.iter().copied().collect();

    let mut merged = Skeleton::default();
    let mut merged_names: HashSet<String> = HashSet::new();

    let push = |skeleton: &mut Skeleton, names: &mut HashSet<String>, mut bone: Bone| {
        if names.contains(&bone.name) {
            return;
        }
        bone.index = skeleton.bones.len();
        names.insert(bone.name.clone());
        skeleton.bones.push(bone);
    };

    for name in &candidates {
        // Only mesh bones are taken directly; donor-only bones enter via
        // ancestor chains.
        let Some(mesh_index) = mesh.index_of(name) else {
            continue;
        };
        let mut bone = mesh.bones[mesh_index].clone();
        if bone.parent.is_none() {
            if let Some(donor_index) = donor.index_of(name) {
                bone.parent = donor.bones[donor_index].parent.clone();
            }
        }

        // Splice in the donor ancestors this bone needs to connect.
        if let Some(parent_name) = bone.parent.clone() {
            let parent_known =
                mesh_names.contains(parent_name.as_str()) || merged_names.contains(&parent_name);
            if !parent_known && donor.contains(&parent_name) {
                let mut chain: Vec<Bone> = Vec::new();
                let mut current = donor.index_of(&parent_name);
                while let Some(donor_index) = current {
                    let donor_bone = &donor.bones[donor_index];
                    let name = donor_bone.name.as_str();
                    if !candidate_set.contains(name)
                        || mesh_names.contains(name)
                        || merged_names.contains(name)
                    {
                        break;
                    }
                    chain.push(donor_bone.clone());
                    current = donor_bone
                        .parent
                        .as_deref()
                        .filter(|p| !p.is_empty())
                        .and_then(|p| donor.index_of(p));
                    if current.is_none() {
                        break;
                    }
                }

                // The chain must end at a bone whose parent the mesh knows,
                // unless dangling chains are explicitly allowed.
                let connects = chain.last().is_some_and(|end| {
                    end.parent
                        .as_deref()
                        .is_some_and(|p| mesh_names.contains(p))
                });
                if !chain.is_empty() && (settings.connect_rig_to_root || connects) {
                    // Ancestors before descendants: reverse the walk order.
                    for donated in chain.into_iter().rev() {
                        push(&mut merged, &mut merged_names, donated);
                    }
                }
            }
        }

        push(&mut merged, &mut merged_names, bone);
    }

    if settings.parent_to_root {
        merged.apply_root_policy(RootPolicy::SyntheticRoot);
    }
    merged
}

/// Map the mesh's own bone order to indices in the merged skeleton, for
/// the host's vertex bone-index remap. The synthetic root never maps.
#[must_use]
pub fn bone_map(mesh_bone_names: &[String], merged: &Skeleton) -> Vec<usize> {
    mesh_bone_names
        .iter()
        .filter(|name| name.as_str() != SYNTHETIC_ROOT)
        .filter_map(|name| merged.index_of(name))
        .collect()
}
