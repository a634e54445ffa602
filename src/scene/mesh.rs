use std::sync::{Arc, RwLock};

use futures::future::try_join_all;
use glam::{Vec2, Vec3, Vec4};
use itertools::Itertools;
use log::warn;

use lodestar_gltf::document::types::{Primitive, PrimitiveMode};

use crate::LoaderError;
use crate::engine::{
    BoundingBox, Geometry, GeometryMesh, MorphTarget, Topology, TransformNode, VertexBuffers,
};
use crate::extensions::Stage;
use crate::resolve::AccessorData;
use crate::session::{LoadSession, LoaderEvent};

fn primitive_key(mesh: usize, primitive: usize) -> u64 {
    (mesh as u64) << 16 | primitive as u64
}

impl LoadSession {
    /// Hangs the node's mesh (and skin, which always rides on a meshed node)
    /// off the transform node. One primitive attaches directly; several
    /// become one synthetic child per primitive under the node's transform.
    pub(crate) async fn attach_mesh_and_skin(
        &self,
        node: &Arc<TransformNode>,
        node_index: usize,
    ) -> Result<(), LoaderError> {
        let doc_node = self.graph().node(node_index)?;
        let Some(mesh_index) = doc_node.mesh else {
            return Ok(());
        };

        let mesh = self.graph().mesh(mesh_index)?;
        let path = format!("/meshes/{}", mesh_index);
        if mesh.primitives.is_empty() {
            warn!("{}: mesh without primitives on node {}", path, node_index);
            return Ok(());
        }

        // Every primitive of a mesh must declare the same morph target count.
        let target_count = mesh.primitives[0].targets.len();
        if mesh
            .primitives
            .iter()
            .any(|p| p.targets.len() != target_count)
        {
            return Err(LoaderError::reference(
                path,
                "primitives disagree on the morph target count",
            ));
        }

        let engine_meshes = try_join_all(
            (0..mesh.primitives.len()).map(|p| self.resolve_primitive(mesh_index, p)),
        )
        .await?;

        // Node weights override the mesh defaults.
        let mut weights = if doc_node.weights.is_empty() {
            mesh.weights.clone()
        } else {
            doc_node.weights.clone()
        };
        weights.resize(target_count, 0.0);

        for engine_mesh in &engine_meshes {
            *engine_mesh.morph_weights.write().expect("weights lock") = weights.clone();
        }

        if engine_meshes.len() == 1 {
            node.meshes
                .write()
                .expect("meshes lock")
                .push(engine_meshes[0].clone());
        } else {
            for (p, engine_mesh) in engine_meshes.iter().enumerate() {
                let child = TransformNode::new(
                    None,
                    format!("{}_{}", node.name, p),
                    crate::engine::Transform::IDENTITY,
                );
                child
                    .meshes
                    .write()
                    .expect("meshes lock")
                    .push(engine_mesh.clone());
                node.attach_child(&child);
            }
        }

        if let Some(skin_index) = doc_node.skin {
            let skeleton = self.resolve_skin(skin_index).await?;
            for engine_mesh in &engine_meshes {
                *engine_mesh.skeleton.write().expect("skeleton lock") = Some(skeleton.clone());
            }
        }
        Ok(())
    }

    /// One engine mesh per document primitive. Shared between instantiating
    /// nodes unless `create_instances` asks for per-use copies (which still
    /// share the resolved geometry).
    pub async fn resolve_primitive(
        &self,
        mesh: usize,
        primitive: usize,
    ) -> Result<Arc<GeometryMesh>, LoaderError> {
        let key = primitive_key(mesh, primitive);
        if !self.options.create_instances {
            if let Some(hit) = self.caches.meshes.peek(key) {
                return hit;
            }
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Primitive, key, |ext, ctx| {
                ext.load_primitive(ctx, mesh, primitive)
            })
            .await?
        {
            if !self.options.create_instances {
                self.caches.meshes.store_if_vacant(key, Ok(claimed.clone()));
            }
            self.record_mesh(claimed.clone());
            return Ok(claimed);
        }
        if self.options.create_instances {
            Box::pin(self.load_primitive_default(mesh, primitive)).await
        } else {
            self.caches
                .meshes
                .get_or_resolve(key, Box::pin(self.load_primitive_default(mesh, primitive)))
                .await
        }
    }

    async fn load_primitive_default(
        &self,
        mesh_index: usize,
        primitive_index: usize,
    ) -> Result<Arc<GeometryMesh>, LoaderError> {
        self.check_disposed()?;
        let mesh = self.graph().mesh(mesh_index)?;
        let path = format!("/meshes/{}/primitives/{}", mesh_index, primitive_index);
        let primitive = mesh
            .primitives
            .get(primitive_index)
            .ok_or_else(|| LoaderError::reference(&path, "no such primitive"))?;

        // Morph targets first, vertex data after; a target with a broken
        // delta accessor fails the primitive before any geometry exists.
        let morph_targets = self.load_morph_targets(primitive, &path).await?;
        let geometry = self.resolve_vertex_data(mesh_index, primitive_index).await?;

        let material = if self.options.skip_materials {
            None
        } else {
            Some(match primitive.material {
                Some(m) => self.resolve_material(m, geometry.topology).await?,
                None => self.default_material(geometry.topology),
            })
        };

        let bounds = if self.options.always_compute_bounds {
            compute_bounds(&geometry.vertex_buffers.positions)
        } else {
            declared_bounds(self.graph(), primitive).or_else(|| {
                compute_bounds(&geometry.vertex_buffers.positions)
            })
        };

        let name = match mesh.primitives.len() {
            1 => mesh
                .name
                .clone()
                .unwrap_or_else(|| format!("mesh_{}", mesh_index)),
            _ => format!(
                "{}_{}",
                mesh.name
                    .clone()
                    .unwrap_or_else(|| format!("mesh_{}", mesh_index)),
                primitive_index
            ),
        };

        let target_count = morph_targets.len();
        let engine_mesh = Arc::new(GeometryMesh {
            name,
            geometry,
            material: RwLock::new(material.clone()),
            bounds,
            morph_targets,
            morph_weights: RwLock::new(vec![0.0; target_count]),
            skeleton: RwLock::new(None),
        });
        if let Some(material) = &material {
            material.add_consumer(&engine_mesh);
        }

        self.record_mesh(engine_mesh.clone());
        self.emit(LoaderEvent::MeshCreated(engine_mesh.clone()));
        self.counters.meshes_resolved();
        Ok(engine_mesh)
    }

    /// The primitive's geometry: indices plus de-interleaved vertex streams,
    /// memoized per (mesh, primitive).
    pub async fn resolve_vertex_data(
        &self,
        mesh: usize,
        primitive: usize,
    ) -> Result<Arc<Geometry>, LoaderError> {
        let key = primitive_key(mesh, primitive);
        if let Some(hit) = self.caches.geometries.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::VertexData, key, |ext, ctx| {
                ext.load_vertex_data(ctx, mesh, primitive)
            })
            .await?
        {
            self.caches
                .geometries
                .store_if_vacant(key, Ok(claimed.clone()));
            return Ok(claimed);
        }
        self.caches
            .geometries
            .get_or_resolve(key, Box::pin(self.load_vertex_data_default(mesh, primitive)))
            .await
    }

    async fn load_vertex_data_default(
        &self,
        mesh_index: usize,
        primitive_index: usize,
    ) -> Result<Arc<Geometry>, LoaderError> {
        self.check_disposed()?;
        let mesh = self.graph().mesh(mesh_index)?;
        let path = format!("/meshes/{}/primitives/{}", mesh_index, primitive_index);
        let primitive = mesh
            .primitives
            .get(primitive_index)
            .ok_or_else(|| LoaderError::reference(&path, "no such primitive"))?;

        let topology = topology_of(primitive.mode)
            .ok_or_else(|| LoaderError::unsupported(&path, "primitive mode LINE_LOOP"))?;

        if !primitive.attributes.contains_key("POSITION") {
            return Err(LoaderError::reference(&path, "primitive without POSITION"));
        }

        // Attribute order from the map is unstable; sort so that resolution
        // order (and with it any warning order) is deterministic.
        let semantics = primitive.attributes.keys().sorted().collect::<Vec<_>>();
        let resolved = try_join_all(semantics.iter().map(|semantic| async move {
            let accessor = self.resolve_accessor(primitive.attributes[*semantic]).await?;
            Ok::<_, LoaderError>((semantic.as_str(), accessor))
        }))
        .await?;

        let mut buffers = VertexBuffers::default();
        for (semantic, data) in &resolved {
            fill_attribute(&mut buffers, semantic, data, &path)?;
        }

        let (indices, unindexed) = match primitive.indices {
            Some(accessor) => (self.resolve_indices(accessor).await?.as_ref().clone(), false),
            None => (
                (0..buffers.positions.len() as u32).collect::<Vec<u32>>(),
                true,
            ),
        };

        Ok(Arc::new(Geometry {
            topology,
            indices,
            unindexed,
            vertex_buffers: buffers,
        }))
    }

    async fn load_morph_targets(
        &self,
        primitive: &Primitive,
        path: &str,
    ) -> Result<Vec<MorphTarget>, LoaderError> {
        let mut targets = Vec::with_capacity(primitive.targets.len());
        for (t, deltas) in primitive.targets.iter().enumerate() {
            let mut target = MorphTarget {
                position_deltas: Vec::new(),
                normal_deltas: Vec::new(),
                tangent_deltas: Vec::new(),
            };
            for (semantic, &accessor) in deltas.iter().sorted_by_key(|(s, _)| s.as_str()) {
                let data = self.resolve_accessor(accessor).await?;
                let delta_path = format!("{}/targets/{}/{}", path, t, semantic);
                match semantic.as_str() {
                    "POSITION" => {
                        data.ensure_components(3, &delta_path)?;
                        target.position_deltas = to_vec3(&data);
                    }
                    "NORMAL" => {
                        data.ensure_components(3, &delta_path)?;
                        target.normal_deltas = to_vec3(&data);
                    }
                    "TANGENT" => {
                        data.ensure_components(3, &delta_path)?;
                        target.tangent_deltas = to_vec3(&data);
                    }
                    other => warn!(
                        "{}/targets/{}: ignoring morph attribute {}",
                        path, t, other
                    ),
                }
            }
            targets.push(target);
        }
        Ok(targets)
    }
}

fn topology_of(mode: PrimitiveMode) -> Option<Topology> {
    match mode {
        PrimitiveMode::Points => Some(Topology::Points),
        PrimitiveMode::Lines => Some(Topology::Lines),
        PrimitiveMode::LineLoop => None,
        PrimitiveMode::LineStrip => Some(Topology::LineStrip),
        PrimitiveMode::Triangles => Some(Topology::Triangles),
        PrimitiveMode::TriangleStrip => Some(Topology::TriangleStrip),
        PrimitiveMode::TriangleFan => Some(Topology::TriangleFan),
    }
}

fn fill_attribute(
    buffers: &mut VertexBuffers,
    semantic: &str,
    data: &AccessorData,
    path: &str,
) -> Result<(), LoaderError> {
    let attribute_path = format!("{}/attributes/{}", path, semantic);
    match semantic {
        "POSITION" => {
            data.ensure_components(3, &attribute_path)?;
            buffers.positions = to_vec3(data);
        }
        "NORMAL" => {
            data.ensure_components(3, &attribute_path)?;
            buffers.normals = to_vec3(data);
        }
        "TANGENT" => {
            data.ensure_components(4, &attribute_path)?;
            buffers.tangents = to_vec4(data);
        }
        "COLOR_0" => {
            data.ensure_components(3, &attribute_path)?;
            buffers.colors = to_color(data);
        }
        "JOINTS_0" => {
            data.ensure_components(4, &attribute_path)?;
            buffers.joints = to_joints(data);
        }
        "WEIGHTS_0" => {
            data.ensure_components(4, &attribute_path)?;
            buffers.weights = to_vec4(data);
        }
        "JOINTS_1" => {
            data.ensure_components(4, &attribute_path)?;
            buffers.joints_extra = to_joints(data);
        }
        "WEIGHTS_1" => {
            data.ensure_components(4, &attribute_path)?;
            buffers.weights_extra = to_vec4(data);
        }
        other => match texcoord_set(other) {
            Some(set) => {
                data.ensure_components(2, &attribute_path)?;
                if buffers.texcoords.len() <= set {
                    buffers.texcoords.resize(set + 1, Vec::new());
                }
                buffers.texcoords[set] = to_vec2(data);
            }
            None => warn!("{}: ignoring vertex attribute {}", path, other),
        },
    }
    Ok(())
}

fn texcoord_set(semantic: &str) -> Option<usize> {
    semantic.strip_prefix("TEXCOORD_")?.parse().ok()
}

fn to_vec2(data: &AccessorData) -> Vec<Vec2> {
    (0..data.count).map(|i| data.vec2(i)).collect()
}

fn to_vec3(data: &AccessorData) -> Vec<Vec3> {
    (0..data.count).map(|i| data.vec3(i)).collect()
}

fn to_vec4(data: &AccessorData) -> Vec<Vec4> {
    (0..data.count).map(|i| data.vec4(i)).collect()
}

/// Colors may come as VEC3; the alpha channel fills with one.
fn to_color(data: &AccessorData) -> Vec<Vec4> {
    match data.components {
        3 => (0..data.count)
            .map(|i| data.vec3(i).extend(1.0))
            .collect(),
        _ => to_vec4(data),
    }
}

fn to_joints(data: &AccessorData) -> Vec<[u16; 4]> {
    (0..data.count)
        .map(|i| {
            let v = data.vec4(i);
            [v.x as u16, v.y as u16, v.z as u16, v.w as u16]
        })
        .collect()
}

fn declared_bounds(
    graph: &crate::document::DocumentGraph,
    primitive: &Primitive,
) -> Option<BoundingBox> {
    let accessor = graph.accessor(*primitive.attributes.get("POSITION")?).ok()?;
    if accessor.min.len() != 3 || accessor.max.len() != 3 {
        return None;
    }
    Some(BoundingBox {
        min: Vec3::new(
            accessor.min[0] as f32,
            accessor.min[1] as f32,
            accessor.min[2] as f32,
        ),
        max: Vec3::new(
            accessor.max[0] as f32,
            accessor.max[1] as f32,
            accessor.max[2] as f32,
        ),
    })
}

pub(crate) fn compute_bounds(positions: &[Vec3]) -> Option<BoundingBox> {
    let first = positions.first()?;
    let mut bounds = BoundingBox {
        min: *first,
        max: *first,
    };
    for position in &positions[1..] {
        bounds.min = bounds.min.min(*position);
        bounds.max = bounds.max.max(*position);
    }
    Some(bounds)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::LoaderError;
    use crate::engine::VertexBuffers;
    use crate::resolve::AccessorData;

    use super::{compute_bounds, fill_attribute, texcoord_set, to_color, to_joints};

    #[test]
    fn bounds_span_all_positions() {
        let positions = [
            Vec3::new(1.0, -2.0, 0.0),
            Vec3::new(-1.0, 5.0, 3.0),
            Vec3::new(0.5, 0.0, -4.0),
        ];
        let bounds = compute_bounds(&positions).expect("bounds");
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, -4.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 5.0, 3.0));
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn texcoord_semantics_parse_their_set() {
        assert_eq!(texcoord_set("TEXCOORD_0"), Some(0));
        assert_eq!(texcoord_set("TEXCOORD_3"), Some(3));
        assert_eq!(texcoord_set("_CUSTOM"), None);
        assert_eq!(texcoord_set("TEXCOORD_"), None);
    }

    #[test]
    fn vec3_colors_gain_opaque_alpha() {
        let data = AccessorData {
            components: 3,
            count: 1,
            values: vec![0.25, 0.5, 0.75],
        };
        let colors = to_color(&data);
        assert_eq!(colors[0].w, 1.0);
        assert_eq!(colors[0].x, 0.25);
    }

    #[test]
    fn scalar_data_on_a_vector_attribute_is_a_reference_error() {
        let data = AccessorData {
            components: 1,
            count: 3,
            values: vec![0.0, 1.0, 2.0],
        };
        let mut buffers = VertexBuffers::default();
        let error = fill_attribute(&mut buffers, "POSITION", &data, "/meshes/0/primitives/0")
            .expect_err("one component cannot carry positions");
        assert!(matches!(error, LoaderError::Reference { .. }));
        assert!(buffers.positions.is_empty());
    }

    #[test]
    fn joints_round_down_to_u16() {
        let data = AccessorData {
            components: 4,
            count: 1,
            values: vec![0.0, 1.0, 7.0, 255.0],
        };
        assert_eq!(to_joints(&data), vec![[0, 1, 7, 255]]);
    }
}
