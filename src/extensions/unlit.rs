//! Unlit material override (`KHR_materials_unlit`-shaped): claims the
//! material stage for materials carrying its block and builds a shading-free
//! material from the base color alone.

use std::sync::Arc;

use glam::{Vec3, Vec4};

use lodestar_gltf::document::types::{AlphaMode, PbrMetallicRoughness};

use crate::engine::{AlphaBlend, Material, Topology};
use crate::extensions::{Extension, Hook};
use crate::session::{LoadSession, LoaderEvent};

pub const EXTENSION_NAME: &str = "KHR_materials_unlit";

pub struct UnlitMaterials {}

impl Extension for UnlitMaterials {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn load_material<'a>(
        &'a self,
        ctx: &'a LoadSession,
        index: usize,
        topology: Topology,
    ) -> Hook<'a, Arc<Material>> {
        Box::pin(async move {
            let doc = ctx.graph().material(index)?;
            if doc.extensions.get(EXTENSION_NAME).is_none() {
                return Ok(None);
            }

            let default_pbr = PbrMetallicRoughness::default();
            let pbr = doc.pbr_metallic_roughness.as_ref().unwrap_or(&default_pbr);

            let mut material = Material::new(
                doc.name
                    .clone()
                    .unwrap_or_else(|| format!("material_{}", index)),
                topology,
            );
            material.unlit = true;
            material.base_color = Vec4::from_array(pbr.base_color_factor);
            // Shading inputs are meaningless on an unlit surface.
            material.metallic = 0.0;
            material.roughness = 1.0;
            material.emissive = Vec3::ZERO;
            material.alpha = match doc.alpha_mode {
                AlphaMode::Opaque => AlphaBlend::Opaque,
                AlphaMode::Mask => AlphaBlend::Mask {
                    cutoff: doc.alpha_cutoff,
                },
                AlphaMode::Blend => AlphaBlend::Blend,
            };
            material.double_sided = doc.double_sided;

            if let Some(texture) = &pbr.base_color_texture {
                material.base_color_texture = Some(
                    ctx.resolve_texture(texture.index, ctx.options.use_srgb_buffers)
                        .await?,
                );
            }

            let material = Arc::new(material);
            ctx.emit(LoaderEvent::MaterialCreated(material.clone()));
            Ok(Some(material))
        })
    }
}
