use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{BoxFuture, try_join_all};
use glam::{Mat4, Quat, Vec3};

use lodestar_gltf::document::types::{CameraType, Node};

use crate::LoaderError;
use crate::engine::{Camera, CameraProjection, Transform, TransformNode};
use crate::extensions::Stage;
use crate::session::{CoordinateSystem, LoadSession, LoaderEvent};

impl LoadSession {
    /// Materializes a scene under a fresh synthetic root node. The root
    /// carries the coordinate-system correction so the document's handedness
    /// never leaks into the node transforms themselves.
    pub async fn resolve_scene(&self, index: usize) -> Result<Arc<TransformNode>, LoaderError> {
        self.check_disposed()?;
        let scene = self.graph().scene(index)?;
        let name = scene
            .name
            .clone()
            .unwrap_or_else(|| format!("scene_{}", index));

        let root_transform = match self.options.coordinate_system {
            // Documents are right-handed; flipping Z on the root converts
            // the whole scene without touching any node.
            CoordinateSystem::Auto => Transform {
                scale: Vec3::new(1.0, 1.0, -1.0),
                ..Transform::IDENTITY
            },
            CoordinateSystem::ForceRightHanded => Transform::IDENTITY,
        };
        let root = TransformNode::new(None, name, root_transform);

        if let Some(claimed) = self
            .apply_extensions(Stage::Scene, index as u64, |ext, ctx| {
                ext.load_scene(ctx, index)
            })
            .await?
        {
            for node in &claimed {
                root.attach_child(node);
            }
            return Ok(root);
        }

        let trail = HashSet::new();
        for &node_index in &scene.nodes {
            self.resolve_node_under(node_index, Some(&root), &trail)
                .await?;
        }
        Ok(root)
    }

    /// Materializes (or returns the already materialized) node. Callers
    /// outside the scene recursion, extensions included, enter here.
    pub async fn resolve_node(&self, index: usize) -> Result<Arc<TransformNode>, LoaderError> {
        self.resolve_node_under(index, None, &HashSet::new()).await
    }

    /// `trail` is the set of node indices on the current DFS path; each
    /// branch extends its own copy, so sibling subtrees can resolve
    /// concurrently.
    fn resolve_node_under<'a>(
        &'a self,
        index: usize,
        parent: Option<&'a Arc<TransformNode>>,
        trail: &'a HashSet<usize>,
    ) -> BoxFuture<'a, Result<Arc<TransformNode>, LoaderError>> {
        Box::pin(async move {
            self.check_disposed()?;
            // The trail wins over the visited map: a node materializes
            // before its children resolve, so an on-path revisit would
            // otherwise masquerade as an ordinary shared node.
            if trail.contains(&index) {
                return Err(LoaderError::CircularHierarchy {
                    path: format!("/nodes/{}", index),
                });
            }
            if let Some(existing) = self.nodes.get(&index) {
                // First materialization wins; the graph builder already
                // warned about duplicate parenthood.
                return Ok(existing.clone());
            }
            self.load_node_inner(index, parent, trail).await
        })
    }

    async fn load_node_inner(
        &self,
        index: usize,
        parent: Option<&Arc<TransformNode>>,
        trail: &HashSet<usize>,
    ) -> Result<Arc<TransformNode>, LoaderError> {
        if let Some(claimed) = self
            .apply_extensions(Stage::Node, index as u64, |ext, ctx| {
                ext.load_node(ctx, index)
            })
            .await?
        {
            self.nodes.entry(index).or_insert_with(|| claimed.clone());
            if let Some(parent) = parent {
                parent.attach_child(&claimed);
            }
            return Ok(claimed);
        }

        let doc_node = self.graph().node(index)?;
        let name = doc_node
            .name
            .clone()
            .unwrap_or_else(|| format!("node_{}", index));
        // Skinned nodes keep identity, the skeleton drives them.
        let transform = if doc_node.skin.is_some() {
            Transform::IDENTITY
        } else {
            node_transform(doc_node)
        };

        let node = TransformNode::new(Some(index), name, transform);
        if let Some(parent) = parent {
            parent.attach_child(&node);
        }
        self.nodes.insert(index, node.clone());

        let mut trail = trail.clone();
        trail.insert(index);

        let children = try_join_all(
            doc_node
                .children
                .iter()
                .map(|&child| self.resolve_node_under(child, Some(&node), &trail)),
        );
        tokio::try_join!(
            children,
            self.attach_mesh_and_skin(&node, index),
            self.attach_camera(&node, index),
        )?;

        self.counters.nodes_resolved();
        Ok(node)
    }

    async fn attach_camera(
        &self,
        node: &Arc<TransformNode>,
        index: usize,
    ) -> Result<(), LoaderError> {
        let Some(camera_index) = self.graph().node(index)?.camera else {
            return Ok(());
        };
        let camera = self.resolve_camera(camera_index).await?;
        *node.camera.write().expect("camera lock") = Some(camera);
        Ok(())
    }

    pub async fn resolve_camera(&self, index: usize) -> Result<Arc<Camera>, LoaderError> {
        let key = index as u64;
        if let Some(hit) = self.caches.cameras.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Camera, key, |ext, ctx| ext.load_camera(ctx, index))
            .await?
        {
            self.caches.cameras.store_if_vacant(key, Ok(claimed.clone()));
            self.record_camera(claimed.clone());
            return Ok(claimed);
        }
        self.caches
            .cameras
            .get_or_resolve(key, Box::pin(self.load_camera_default(index)))
            .await
    }

    async fn load_camera_default(&self, index: usize) -> Result<Arc<Camera>, LoaderError> {
        self.check_disposed()?;
        let camera = self.graph().camera(index)?;
        let path = format!("/cameras/{}", index);

        let projection = match camera.camera_type {
            CameraType::Perspective => {
                let p = camera
                    .perspective
                    .as_ref()
                    .ok_or_else(|| LoaderError::reference(&path, "missing perspective block"))?;
                CameraProjection::Perspective {
                    yfov: p.yfov,
                    aspect_ratio: p.aspect_ratio,
                    znear: p.znear,
                    zfar: p.zfar,
                }
            }
            CameraType::Orthographic => {
                let o = camera
                    .orthographic
                    .as_ref()
                    .ok_or_else(|| LoaderError::reference(&path, "missing orthographic block"))?;
                CameraProjection::Orthographic {
                    xmag: o.xmag,
                    ymag: o.ymag,
                    znear: o.znear,
                    zfar: o.zfar,
                }
            }
        };

        let camera = Arc::new(Camera {
            name: camera
                .name
                .clone()
                .unwrap_or_else(|| format!("camera_{}", index)),
            projection,
        });
        self.record_camera(camera.clone());
        self.emit(LoaderEvent::CameraCreated(camera.clone()));
        Ok(camera)
    }
}

fn node_transform(node: &Node) -> Transform {
    if let Some(matrix) = node.matrix {
        return Transform::from_matrix(Mat4::from_cols_array(&matrix));
    }
    Transform {
        translation: node.translation.map_or(Vec3::ZERO, Vec3::from_array),
        rotation: node.rotation.map_or(Quat::IDENTITY, Quat::from_array),
        scale: node.scale.map_or(Vec3::ONE, Vec3::from_array),
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Quat, Vec3};
    use lodestar_gltf::document::types::Node;

    use super::node_transform;

    fn bare_node() -> Node {
        serde_json::from_str("{}").expect("empty node")
    }

    #[test]
    fn trs_fields_override_identity() {
        let mut node = bare_node();
        node.translation = Some([1.0, 2.0, 3.0]);
        node.scale = Some([2.0, 2.0, 2.0]);
        let transform = node_transform(&node);
        assert_eq!(transform.translation, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(transform.rotation, Quat::IDENTITY);
        assert_eq!(transform.scale, Vec3::splat(2.0));
    }

    #[test]
    fn matrix_decomposes_to_trs() {
        let mut node = bare_node();
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::splat(3.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::new(0.0, 5.0, 0.0),
        );
        node.matrix = Some(matrix.to_cols_array());
        let transform = node_transform(&node);
        assert!((transform.translation - Vec3::new(0.0, 5.0, 0.0)).length() < 1e-5);
        assert!((transform.scale - Vec3::splat(3.0)).length() < 1e-4);
    }
}
