use std::fmt::{Debug, Formatter};
use std::sync::{Arc, RwLock, Weak};

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// A node of the materialized scene graph. Children and attachments are filled
/// in as their resolutions complete, hence the interior mutability.
pub struct TransformNode {
    /// Document node index; `None` for synthetic nodes (the scene root and
    /// per-primitive children of multi-primitive meshes).
    pub index: Option<usize>,
    pub name: String,
    pub local_transform: RwLock<Transform>,
    pub parent: RwLock<Weak<TransformNode>>,
    pub children: RwLock<Vec<Arc<TransformNode>>>,
    pub meshes: RwLock<Vec<Arc<GeometryMesh>>>,
    pub camera: RwLock<Option<Arc<Camera>>>,
    pub light: RwLock<Option<Arc<Light>>>,
}

impl TransformNode {
    pub fn new(index: Option<usize>, name: String, transform: Transform) -> Arc<Self> {
        Arc::new(Self {
            index,
            name,
            local_transform: RwLock::new(transform),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            meshes: RwLock::new(Vec::new()),
            camera: RwLock::new(None),
            light: RwLock::new(None),
        })
    }

    /// Links `child` under `self`. The child's previous parent, if any, loses it.
    pub fn attach_child(self: &Arc<Self>, child: &Arc<TransformNode>) {
        *child.parent.write().expect("parent lock") = Arc::downgrade(self);
        self.children.write().expect("children lock").push(child.clone());
    }

    pub fn world_matrix(&self) -> Mat4 {
        let local = self.local_transform.read().expect("transform lock").to_matrix();
        match self.parent.read().expect("parent lock").upgrade() {
            Some(parent) => parent.world_matrix() * local,
            None => local,
        }
    }
}

impl Debug for TransformNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TransformNode {{ index: {:?}, name: {:?}, children: {} }}",
            self.index,
            self.name,
            self.children.read().expect("children lock").len()
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Debug, Default, Clone)]
pub struct VertexBuffers {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec4>,
    /// One buffer per UV set (TEXCOORD_0, TEXCOORD_1, ...).
    pub texcoords: Vec<Vec<Vec2>>,
    pub colors: Vec<Vec4>,
    /// Bone influences; the second set carries influences five to eight.
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<Vec4>,
    pub joints_extra: Vec<[u16; 4]>,
    pub weights_extra: Vec<Vec4>,
}

#[derive(Clone)]
pub struct Geometry {
    pub topology: Topology,
    pub indices: Vec<u32>,
    /// True when the document had no index accessor and `indices` is the
    /// synthesized ascending sequence.
    pub unindexed: bool,
    pub vertex_buffers: VertexBuffers,
}

impl Debug for Geometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Geometry {{ topology: {:?}, indices: [{}], vertices: [{}] }}",
            self.topology,
            self.indices.len(),
            self.vertex_buffers.positions.len()
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone)]
pub struct MorphTarget {
    pub position_deltas: Vec<Vec3>,
    pub normal_deltas: Vec<Vec3>,
    pub tangent_deltas: Vec<Vec3>,
}

/// One renderable mesh (a single document primitive).
pub struct GeometryMesh {
    pub name: String,
    pub geometry: Arc<Geometry>,
    pub material: RwLock<Option<Arc<Material>>>,
    /// From the accessor's declared min/max; `None` defers bounds to the engine.
    pub bounds: Option<BoundingBox>,
    pub morph_targets: Vec<MorphTarget>,
    pub morph_weights: RwLock<Vec<f32>>,
    pub skeleton: RwLock<Option<Arc<Skeleton>>>,
}

impl Debug for GeometryMesh {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GeometryMesh {{ name: {:?}, geometry: {:?}, targets: {} }}",
            self.name,
            self.geometry,
            self.morph_targets.len()
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AlphaBlend {
    Opaque,
    Mask { cutoff: f32 },
    Blend,
}

#[derive(Debug)]
pub struct Material {
    pub name: String,
    /// Materials are memoized per draw mode, see the resolver.
    pub topology: Topology,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub base_color_texture: Option<Arc<EngineTexture>>,
    pub metallic_roughness_texture: Option<Arc<EngineTexture>>,
    pub normal_texture: Option<(Arc<EngineTexture>, f32)>,
    pub occlusion_texture: Option<(Arc<EngineTexture>, f32)>,
    pub emissive_texture: Option<Arc<EngineTexture>>,
    pub alpha: AlphaBlend,
    pub double_sided: bool,
    pub unlit: bool,
    /// Meshes currently referencing this material; replacement paths use this
    /// to detect orphans before disposing.
    consumers: RwLock<Vec<Weak<GeometryMesh>>>,
}

impl Material {
    pub fn new(name: String, topology: Topology) -> Self {
        Self {
            name,
            topology,
            base_color: Vec4::ONE,
            metallic: 1.0,
            roughness: 1.0,
            emissive: Vec3::ZERO,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
            alpha: AlphaBlend::Opaque,
            double_sided: false,
            unlit: false,
            consumers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_consumer(&self, mesh: &Arc<GeometryMesh>) {
        self.consumers
            .write()
            .expect("consumers lock")
            .push(Arc::downgrade(mesh));
    }

    pub fn remove_consumer(&self, mesh: &Arc<GeometryMesh>) {
        self.consumers
            .write()
            .expect("consumers lock")
            .retain(|weak| !weak.ptr_eq(&Arc::downgrade(mesh)));
    }

    /// Count of meshes still holding this material. Expired weaks are pruned.
    pub fn live_consumers(&self) -> usize {
        let mut consumers = self.consumers.write().expect("consumers lock");
        consumers.retain(|weak| weak.strong_count() > 0);
        consumers.len()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MipmapMode {
    None,
    Nearest,
    Linear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SamplerState {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap: MipmapMode,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

impl Default for SamplerState {
    /// The default sampler: repeat wrap, linear-mipmap-linear filtering.
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap: MipmapMode::Linear,
            wrap_u: WrapMode::Repeat,
            wrap_v: WrapMode::Repeat,
        }
    }
}

/// Decoded (or passed-through) texel data as produced by the injected decoder.
#[derive(Clone)]
pub struct TextureData {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Debug for TextureData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TextureData {{ bytes: [{}], mime_type: {:?} }}",
            self.bytes.len(),
            self.mime_type
        )
    }
}

#[derive(Debug)]
pub struct EngineTexture {
    pub name: String,
    pub data: TextureData,
    pub sampler: SamplerState,
    pub srgb: bool,
}

#[derive(Debug, Copy, Clone)]
pub enum CameraProjection {
    Perspective {
        yfov: f32,
        aspect_ratio: Option<f32>,
        znear: f32,
        zfar: Option<f32>,
    },
    Orthographic {
        xmag: f32,
        ymag: f32,
        znear: f32,
        zfar: f32,
    },
}

#[derive(Debug)]
pub struct Camera {
    pub name: String,
    pub projection: CameraProjection,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LightKind {
    Directional,
    Point,
    Spot {
        inner_cone_angle: f32,
        outer_cone_angle: f32,
    },
}

#[derive(Debug)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub range: Option<f32>,
}

/// One bone per joint node. The transform-node link is deferred until the whole
/// hierarchy exists, see the assembler's deferred queue.
pub struct Bone {
    pub name: String,
    pub node_index: usize,
    pub parent: RwLock<Option<Arc<Bone>>>,
    pub inverse_bind_matrix: RwLock<Mat4>,
    pub linked_node: RwLock<Option<Arc<TransformNode>>>,
}

impl Bone {
    pub fn new(name: String, node_index: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            node_index,
            parent: RwLock::new(None),
            inverse_bind_matrix: RwLock::new(Mat4::IDENTITY),
            linked_node: RwLock::new(None),
        })
    }
}

impl Debug for Bone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bone {{ name: {:?}, node: {} }}", self.name, self.node_index)
    }
}

#[derive(Debug)]
pub struct Skeleton {
    pub name: String,
    /// Explicit or computed skeleton root node, see the skin resolver.
    pub root_node: usize,
    /// In joint order.
    pub bones: Vec<Arc<Bone>>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TrackValue {
    Scalar(f32),
    Vector(Vec3),
    Rotation(Quat),
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub value: TrackValue,
    /// Cubic-spline tangents, already scaled by 1 / target frame rate.
    pub in_tangent: Option<TrackValue>,
    pub out_tangent: Option<TrackValue>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyInterpolation {
    Step,
    Linear,
    CubicSpline,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackTarget {
    Translation { node: usize },
    Rotation { node: usize },
    Scale { node: usize },
    /// Weight channels fan out into one single-valued track per morph target.
    MorphWeight { node: usize, target: usize },
}

#[derive(Debug)]
pub struct AnimationTrack {
    pub target: TrackTarget,
    pub interpolation: KeyInterpolation,
    pub keys: Vec<Keyframe>,
}

#[derive(Debug)]
pub struct AnimationGroup {
    pub name: String,
    pub tracks: Vec<AnimationTrack>,
    pub playing: RwLock<bool>,
}

impl AnimationGroup {
    pub fn start(&self) {
        *self.playing.write().expect("playing lock") = true;
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.read().expect("playing lock")
    }
}
