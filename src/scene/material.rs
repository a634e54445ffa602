use std::sync::Arc;

use glam::{Vec3, Vec4};

use lodestar_gltf::document::types::{AlphaMode, PbrMetallicRoughness};

use crate::LoaderError;
use crate::engine::{AlphaBlend, EngineTexture, Material, Topology};
use crate::extensions::Stage;
use crate::session::{LoadSession, LoaderEvent};

fn topology_slot(topology: Topology) -> u64 {
    match topology {
        Topology::Points => 0,
        Topology::Lines => 1,
        Topology::LineStrip => 2,
        Topology::Triangles => 3,
        Topology::TriangleStrip => 4,
        Topology::TriangleFan => 5,
    }
}

impl LoadSession {
    /// Materials memoize per (index, draw mode): engines key their pipeline
    /// state on the topology, so one document material used by a triangle and
    /// a line primitive becomes two engine materials.
    pub async fn resolve_material(
        &self,
        index: usize,
        topology: Topology,
    ) -> Result<Arc<Material>, LoaderError> {
        let key = (index as u64) << 3 | topology_slot(topology);
        if let Some(hit) = self.caches.materials.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Material, key, |ext, ctx| {
                ext.load_material(ctx, index, topology)
            })
            .await?
        {
            self.caches
                .materials
                .store_if_vacant(key, Ok(claimed.clone()));
            return Ok(claimed);
        }
        self.caches
            .materials
            .get_or_resolve(key, Box::pin(self.load_material_default(index, topology)))
            .await
    }

    async fn load_material_default(
        &self,
        index: usize,
        topology: Topology,
    ) -> Result<Arc<Material>, LoaderError> {
        self.check_disposed()?;
        let doc = self.graph().material(index)?;
        let name = doc
            .name
            .clone()
            .unwrap_or_else(|| format!("material_{}", index));

        let default_pbr = PbrMetallicRoughness::default();
        let pbr = doc.pbr_metallic_roughness.as_ref().unwrap_or(&default_pbr);

        let mut material = Material::new(name, topology);
        material.base_color = Vec4::from_array(pbr.base_color_factor);
        material.metallic = pbr.metallic_factor;
        material.roughness = pbr.roughness_factor;
        material.emissive = Vec3::from_array(doc.emissive_factor);
        material.alpha = match doc.alpha_mode {
            AlphaMode::Opaque => AlphaBlend::Opaque,
            AlphaMode::Mask => AlphaBlend::Mask {
                cutoff: doc.alpha_cutoff,
            },
            AlphaMode::Blend => AlphaBlend::Blend,
        };
        material.double_sided = doc.double_sided;

        // Color-bearing textures sample as sRGB, data textures as linear.
        let srgb = self.options.use_srgb_buffers;
        let (base_color, metallic_roughness, normal, occlusion, emissive) = tokio::try_join!(
            self.optional_texture(pbr.base_color_texture.as_ref().map(|t| t.index), srgb),
            self.optional_texture(pbr.metallic_roughness_texture.as_ref().map(|t| t.index), false),
            self.optional_texture(doc.normal_texture.as_ref().map(|t| t.index), false),
            self.optional_texture(doc.occlusion_texture.as_ref().map(|t| t.index), false),
            self.optional_texture(doc.emissive_texture.as_ref().map(|t| t.index), srgb),
        )?;
        material.base_color_texture = base_color;
        material.metallic_roughness_texture = metallic_roughness;
        material.normal_texture =
            normal.map(|t| (t, doc.normal_texture.as_ref().map_or(1.0, |n| n.scale)));
        material.occlusion_texture =
            occlusion.map(|t| (t, doc.occlusion_texture.as_ref().map_or(1.0, |o| o.strength)));
        material.emissive_texture = emissive;

        let material = Arc::new(material);
        self.emit(LoaderEvent::MaterialCreated(material.clone()));
        self.counters.materials_resolved();
        Ok(material)
    }

    async fn optional_texture(
        &self,
        index: Option<usize>,
        srgb: bool,
    ) -> Result<Option<Arc<EngineTexture>>, LoaderError> {
        match index {
            Some(index) => Ok(Some(self.resolve_texture(index, srgb).await?)),
            None => Ok(None),
        }
    }

    /// The shared fallback for primitives without a material, one per topology.
    pub fn default_material(&self, topology: Topology) -> Arc<Material> {
        self.default_materials
            .entry(topology)
            .or_insert_with(|| Arc::new(Material::new("default".to_owned(), topology)))
            .clone()
    }
}
