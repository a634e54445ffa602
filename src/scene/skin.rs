use std::collections::HashSet;
use std::sync::Arc;

use log::warn;

use crate::LoaderError;
use crate::engine::{Bone, Skeleton};
use crate::extensions::Stage;
use crate::session::{DeferredAction, LoadSession};

impl LoadSession {
    pub async fn resolve_skin(&self, index: usize) -> Result<Arc<Skeleton>, LoaderError> {
        let key = index as u64;
        if let Some(hit) = self.caches.skins.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Skin, key, |ext, ctx| ext.load_skin(ctx, index))
            .await?
        {
            self.caches.skins.store_if_vacant(key, Ok(claimed.clone()));
            self.record_skeleton(claimed.clone());
            return Ok(claimed);
        }
        self.caches
            .skins
            .get_or_resolve(key, Box::pin(self.load_skin_default(index)))
            .await
    }

    async fn load_skin_default(&self, index: usize) -> Result<Arc<Skeleton>, LoaderError> {
        self.check_disposed()?;
        let skin = self.graph().skin(index)?;
        let path = format!("/skins/{}", index);
        if skin.joints.is_empty() {
            return Err(LoaderError::reference(path, "skin without joints"));
        }

        let root_node = self.skeleton_root(skin.skeleton, &skin.joints, &path)?;

        let inverse_bind = match skin.inverse_bind_matrices {
            Some(accessor) => {
                let data = self.resolve_accessor(accessor).await?;
                data.ensure_components(16, &format!("{}/inverseBindMatrices", path))?;
                Some(data)
            }
            None => None,
        };

        let joint_set: HashSet<usize> = skin.joints.iter().copied().collect();
        let mut bones = Vec::with_capacity(skin.joints.len());
        for (slot, &joint) in skin.joints.iter().enumerate() {
            let bone = self.bone_for_node(joint)?;

            if let Some(inverse_bind) = &inverse_bind {
                if slot < inverse_bind.count {
                    *bone.inverse_bind_matrix.write().expect("matrix lock") =
                        inverse_bind.mat4(slot);
                } else {
                    warn!(
                        "{}: no inverse bind matrix for joint slot {}, keeping identity",
                        path, slot
                    );
                }
            }

            // Parent bone: the nearest strict ancestor that is itself a joint
            // of this skin.
            let parent = self
                .graph()
                .ancestry(joint)
                .into_iter()
                .skip(1)
                .find(|ancestor| joint_set.contains(ancestor));
            *bone.parent.write().expect("parent lock") = match parent {
                Some(parent) => Some(self.bone_for_node(parent)?),
                None => None,
            };

            // Bone-to-node linking waits until the whole hierarchy exists.
            self.push_deferred(DeferredAction::LinkBone(bone.clone()));
            bones.push(bone);
        }

        let skeleton = Arc::new(Skeleton {
            name: skin
                .name
                .clone()
                .unwrap_or_else(|| format!("skin_{}", index)),
            root_node,
            bones,
        });
        self.record_skeleton(skeleton.clone());
        self.counters.skins_resolved();
        Ok(skeleton)
    }

    fn skeleton_root(
        &self,
        explicit: Option<usize>,
        joints: &[usize],
        path: &str,
    ) -> Result<usize, LoaderError> {
        if let Some(explicit) = explicit {
            if !self.options.always_compute_skeleton_root {
                if joints
                    .iter()
                    .all(|&joint| self.graph().is_ancestor_of(explicit, joint))
                {
                    return Ok(explicit);
                }
                warn!(
                    "{}: declared skeleton root {} is not an ancestor of every joint, recomputing",
                    path, explicit
                );
            }
        }
        self.find_skeleton_root(joints)
            .ok_or_else(|| LoaderError::reference(path, "joints share no common ancestor"))
    }

    /// Nearest common ancestor of all joints; a joint that is an ancestor of
    /// every other joint is its own root.
    pub(crate) fn find_skeleton_root(&self, joints: &[usize]) -> Option<usize> {
        let chains: Vec<Vec<usize>> = joints
            .iter()
            .map(|&joint| {
                let mut chain = self.graph().ancestry(joint);
                chain.reverse();
                chain
            })
            .collect();

        // Root-first chains share a prefix exactly up to the nearest common
        // ancestor, the parent path of a node being unique.
        let first = chains.first()?;
        let mut nearest = None;
        for (depth, &candidate) in first.iter().enumerate() {
            if chains.iter().all(|chain| chain.get(depth) == Some(&candidate)) {
                nearest = Some(candidate);
            } else {
                break;
            }
        }
        nearest
    }

    fn bone_for_node(&self, node_index: usize) -> Result<Arc<Bone>, LoaderError> {
        if let Some(bone) = self.bones.get(&node_index) {
            return Ok(bone.clone());
        }
        let name = self
            .graph()
            .node(node_index)?
            .name
            .clone()
            .unwrap_or_else(|| format!("bone_{}", node_index));
        let bone = Bone::new(name, node_index);
        Ok(self.bones.entry(node_index).or_insert(bone).clone())
    }
}
