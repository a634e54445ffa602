//! Serde model of the JSON document. Field names and defaults follow the host
//! format; every entity keeps its raw `extensions`/`extras` blocks so that
//! extension modules can deserialize their own sections out of them.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use serde_repr::Deserialize_repr;

use crate::FormatError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub asset: Asset,

    pub scene: Option<usize>,

    #[serde(default)]
    pub scenes: Vec<Scene>,

    #[serde(default)]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub meshes: Vec<Mesh>,

    #[serde(default)]
    pub accessors: Vec<Accessor>,

    #[serde(default)]
    pub buffer_views: Vec<BufferView>,

    #[serde(default)]
    pub buffers: Vec<Buffer>,

    #[serde(default)]
    pub images: Vec<Image>,

    #[serde(default)]
    pub samplers: Vec<Sampler>,

    #[serde(default)]
    pub textures: Vec<Texture>,

    #[serde(default)]
    pub materials: Vec<Material>,

    #[serde(default)]
    pub skins: Vec<Skin>,

    #[serde(default)]
    pub cameras: Vec<Camera>,

    #[serde(default)]
    pub animations: Vec<Animation>,

    #[serde(default)]
    pub extensions_used: Vec<String>,

    #[serde(default)]
    pub extensions_required: Vec<String>,

    #[serde(default)]
    pub extensions: Value,

    #[serde(default)]
    pub extras: Value,
}

impl Document {
    pub fn from_json(json: &str) -> Result<Document, FormatError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default)]
    pub version: String,

    pub generator: Option<String>,

    pub min_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default)]
    pub nodes: Vec<usize>,

    pub name: Option<String>,

    #[serde(default)]
    pub extensions: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub children: Vec<usize>,

    /// Column-major, mutually exclusive with the TRS fields.
    pub matrix: Option<[f32; 16]>,

    pub translation: Option<[f32; 3]>,

    pub rotation: Option<[f32; 4]>,

    pub scale: Option<[f32; 3]>,

    pub mesh: Option<usize>,

    pub skin: Option<usize>,

    pub camera: Option<usize>,

    /// Morph target weights overriding the mesh defaults.
    #[serde(default)]
    pub weights: Vec<f32>,

    pub name: Option<String>,

    #[serde(default)]
    pub extensions: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mesh {
    pub primitives: Vec<Primitive>,

    #[serde(default)]
    pub weights: Vec<f32>,

    pub name: Option<String>,

    #[serde(default)]
    pub extensions: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Primitive {
    /// Attribute semantic ("POSITION", "NORMAL", "TEXCOORD_0", ...) to accessor index.
    pub attributes: HashMap<String, usize>,

    pub indices: Option<usize>,

    pub material: Option<usize>,

    #[serde(default)]
    pub mode: PrimitiveMode,

    /// Morph targets: per-target attribute-delta accessors.
    #[serde(default)]
    pub targets: Vec<HashMap<String, usize>>,

    #[serde(default)]
    pub extensions: Value,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Deserialize_repr)]
#[repr(u32)]
pub enum PrimitiveMode {
    Points = 0,
    Lines = 1,
    LineLoop = 2,
    LineStrip = 3,
    #[default]
    Triangles = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessor {
    pub buffer_view: Option<usize>,

    #[serde(default)]
    pub byte_offset: usize,

    pub component_type: ComponentType,

    #[serde(default)]
    pub normalized: bool,

    pub count: usize,

    #[serde(rename = "type")]
    pub element_type: ElementType,

    #[serde(default)]
    pub min: Vec<f64>,

    #[serde(default)]
    pub max: Vec<f64>,

    pub sparse: Option<Sparse>,

    pub name: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize_repr)]
#[repr(u32)]
pub enum ComponentType {
    Byte = 5120,
    UnsignedByte = 5121,
    Short = 5122,
    UnsignedShort = 5123,
    UnsignedInt = 5125,
    Float = 5126,
}

impl ComponentType {
    pub fn byte_size(&self) -> usize {
        match self {
            ComponentType::Byte | ComponentType::UnsignedByte => 1,
            ComponentType::Short | ComponentType::UnsignedShort => 2,
            ComponentType::UnsignedInt | ComponentType::Float => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    pub fn components(&self) -> usize {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 => 4,
            ElementType::Mat2 => 4,
            ElementType::Mat3 => 9,
            ElementType::Mat4 => 16,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sparse {
    pub count: usize,
    pub indices: SparseIndices,
    pub values: SparseValues,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseIndices {
    pub buffer_view: usize,

    #[serde(default)]
    pub byte_offset: usize,

    pub component_type: ComponentType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseValues {
    pub buffer_view: usize,

    #[serde(default)]
    pub byte_offset: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: usize,

    #[serde(default)]
    pub byte_offset: usize,

    pub byte_length: usize,

    pub byte_stride: Option<usize>,

    pub target: Option<u32>,

    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    /// Absent on the embedded buffer, which maps to the container's binary body.
    pub uri: Option<String>,

    pub byte_length: usize,

    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub uri: Option<String>,

    pub mime_type: Option<String>,

    pub buffer_view: Option<usize>,

    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sampler {
    pub mag_filter: Option<MagFilter>,

    pub min_filter: Option<MinFilter>,

    #[serde(default)]
    pub wrap_s: WrapMode,

    #[serde(default)]
    pub wrap_t: WrapMode,

    pub name: Option<String>,
}

// The sampler enums parse leniently: an unrecognized constant is only a
// cosmetic defect, so it is logged and mapped to a sensible filter or wrap
// instead of failing the whole document.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MagFilter {
    Nearest,
    Linear,
}

impl<'de> Deserialize<'de> for MagFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match u32::deserialize(deserializer)? {
            9728 => MagFilter::Nearest,
            9729 => MagFilter::Linear,
            other => {
                warn!("Unknown magFilter value {}, using linear", other);
                MagFilter::Linear
            }
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MinFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl<'de> Deserialize<'de> for MinFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match u32::deserialize(deserializer)? {
            9728 => MinFilter::Nearest,
            9729 => MinFilter::Linear,
            9984 => MinFilter::NearestMipmapNearest,
            9985 => MinFilter::LinearMipmapNearest,
            9986 => MinFilter::NearestMipmapLinear,
            9987 => MinFilter::LinearMipmapLinear,
            other => {
                warn!("Unknown minFilter value {}, using trilinear", other);
                MinFilter::LinearMipmapLinear
            }
        })
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum WrapMode {
    ClampToEdge,
    MirroredRepeat,
    #[default]
    Repeat,
}

impl<'de> Deserialize<'de> for WrapMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match u32::deserialize(deserializer)? {
            33071 => WrapMode::ClampToEdge,
            33648 => WrapMode::MirroredRepeat,
            10497 => WrapMode::Repeat,
            other => {
                warn!("Unknown wrap mode {}, using repeat", other);
                WrapMode::Repeat
            }
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Texture {
    pub sampler: Option<usize>,

    pub source: Option<usize>,

    pub name: Option<String>,

    #[serde(default)]
    pub extensions: Value,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureInfo {
    pub index: usize,

    #[serde(default)]
    pub tex_coord: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub pbr_metallic_roughness: Option<PbrMetallicRoughness>,

    pub normal_texture: Option<NormalTextureInfo>,

    pub occlusion_texture: Option<OcclusionTextureInfo>,

    pub emissive_texture: Option<TextureInfo>,

    #[serde(default)]
    pub emissive_factor: [f32; 3],

    #[serde(default)]
    pub alpha_mode: AlphaMode,

    #[serde(default = "default_alpha_cutoff")]
    pub alpha_cutoff: f32,

    #[serde(default)]
    pub double_sided: bool,

    pub name: Option<String>,

    #[serde(default)]
    pub extensions: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbrMetallicRoughness {
    #[serde(default = "default_base_color_factor")]
    pub base_color_factor: [f32; 4],

    pub base_color_texture: Option<TextureInfo>,

    #[serde(default = "default_one")]
    pub metallic_factor: f32,

    #[serde(default = "default_one")]
    pub roughness_factor: f32,

    pub metallic_roughness_texture: Option<TextureInfo>,
}

impl Default for PbrMetallicRoughness {
    fn default() -> Self {
        Self {
            base_color_factor: default_base_color_factor(),
            base_color_texture: None,
            metallic_factor: default_one(),
            roughness_factor: default_one(),
            metallic_roughness_texture: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalTextureInfo {
    pub index: usize,

    #[serde(default)]
    pub tex_coord: usize,

    #[serde(default = "default_one")]
    pub scale: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcclusionTextureInfo {
    pub index: usize,

    #[serde(default)]
    pub tex_coord: usize,

    #[serde(default = "default_one")]
    pub strength: f32,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skin {
    pub joints: Vec<usize>,

    /// Explicit skeleton root; recomputed when absent or not an ancestor.
    pub skeleton: Option<usize>,

    pub inverse_bind_matrices: Option<usize>,

    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    #[serde(rename = "type")]
    pub camera_type: CameraType,

    pub perspective: Option<Perspective>,

    pub orthographic: Option<Orthographic>,

    pub name: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraType {
    Perspective,
    Orthographic,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perspective {
    pub aspect_ratio: Option<f32>,
    pub yfov: f32,
    pub znear: f32,
    pub zfar: Option<f32>,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orthographic {
    pub xmag: f32,
    pub ymag: f32,
    pub znear: f32,
    pub zfar: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animation {
    pub channels: Vec<Channel>,

    pub samplers: Vec<AnimationSampler>,

    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub sampler: usize,
    pub target: ChannelTarget,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTarget {
    pub node: Option<usize>,
    pub path: TargetPath,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPath {
    Translation,
    Rotation,
    Scale,
    Weights,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationSampler {
    pub input: usize,

    pub output: usize,

    #[serde(default)]
    pub interpolation: Interpolation,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Interpolation {
    Step,
    #[default]
    Linear,
    Cubicspline,
}

fn default_one() -> f32 {
    1.0
}

fn default_alpha_cutoff() -> f32 {
    0.5
}

fn default_base_color_factor() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}
