//! Punctual lights (`KHR_lights_punctual`-shaped): light definitions live in
//! the document-level extension block, nodes reference them by index.

use std::sync::{Arc, OnceLock};

use glam::Vec3;
use serde::Deserialize;

use crate::LoaderError;
use crate::engine::{Light, LightKind, TransformNode};
use crate::extensions::{Extension, Hook};
use crate::session::LoadSession;

pub const EXTENSION_NAME: &str = "KHR_lights_punctual";

#[derive(Debug, Deserialize)]
struct LightsBlock {
    lights: Vec<LightDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LightDefinition {
    #[serde(rename = "type")]
    kind: LightType,

    #[serde(default = "default_color")]
    color: [f32; 3],

    #[serde(default = "default_intensity")]
    intensity: f32,

    range: Option<f32>,

    spot: Option<SpotDefinition>,

    name: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LightType {
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotDefinition {
    #[serde(default)]
    inner_cone_angle: f32,

    #[serde(default = "default_outer_cone_angle")]
    outer_cone_angle: f32,
}

#[derive(Debug, Deserialize)]
struct LightReference {
    light: usize,
}

fn default_color() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_intensity() -> f32 {
    1.0
}

fn default_outer_cone_angle() -> f32 {
    std::f32::consts::FRAC_PI_4
}

pub struct PunctualLights {
    lights: OnceLock<Result<Vec<Arc<Light>>, LoaderError>>,
}

impl PunctualLights {
    pub fn new() -> Self {
        Self {
            lights: OnceLock::new(),
        }
    }

    fn light(&self, ctx: &LoadSession, index: usize) -> Result<Arc<Light>, LoaderError> {
        let lights = self
            .lights
            .get_or_init(|| parse_lights(ctx))
            .as_ref()
            .map_err(Clone::clone)?;
        lights.get(index).cloned().ok_or_else(|| {
            LoaderError::Extension {
                name: EXTENSION_NAME.to_owned(),
                detail: format!("no light definition at index {}", index),
            }
        })
    }
}

impl Default for PunctualLights {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_lights(ctx: &LoadSession) -> Result<Vec<Arc<Light>>, LoaderError> {
    let Some(block) = ctx.graph().document().extensions.get(EXTENSION_NAME) else {
        return Ok(Vec::new());
    };
    let block: LightsBlock =
        serde_json::from_value(block.clone()).map_err(|e| LoaderError::Extension {
            name: EXTENSION_NAME.to_owned(),
            detail: e.to_string(),
        })?;

    Ok(block
        .lights
        .into_iter()
        .enumerate()
        .map(|(index, def)| {
            let kind = match def.kind {
                LightType::Directional => LightKind::Directional,
                LightType::Point => LightKind::Point,
                LightType::Spot => {
                    let spot = def.spot.unwrap_or(SpotDefinition {
                        inner_cone_angle: 0.0,
                        outer_cone_angle: default_outer_cone_angle(),
                    });
                    LightKind::Spot {
                        inner_cone_angle: spot.inner_cone_angle,
                        outer_cone_angle: spot.outer_cone_angle,
                    }
                }
            };
            Arc::new(Light {
                name: def.name.unwrap_or_else(|| format!("light_{}", index)),
                kind,
                color: Vec3::from_array(def.color),
                intensity: def.intensity,
                range: def.range,
            })
        })
        .collect())
}

impl Extension for PunctualLights {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn load_node<'a>(&'a self, ctx: &'a LoadSession, index: usize) -> Hook<'a, Arc<TransformNode>> {
        Box::pin(async move {
            let doc_node = ctx.graph().node(index)?;
            let Some(reference) = doc_node.extensions.get(EXTENSION_NAME) else {
                return Ok(None);
            };
            let reference: LightReference =
                serde_json::from_value(reference.clone()).map_err(|e| LoaderError::Extension {
                    name: EXTENSION_NAME.to_owned(),
                    detail: e.to_string(),
                })?;

            // The reentrancy guard for this node is held, so this call skips
            // us and runs the default node construction.
            let node = ctx.resolve_node(index).await?;
            let light = self.light(ctx, reference.light)?;
            *node.light.write().expect("light lock") = Some(light.clone());
            ctx.record_light(light);
            Ok(Some(node))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{LightDefinition, LightType, LightsBlock};

    #[test]
    fn definitions_deserialize_with_documented_defaults() {
        let block: LightsBlock = serde_json::from_str(
            r#"{"lights": [
                {"type": "spot", "spot": {"outerConeAngle": 0.5}},
                {"type": "directional", "color": [1.0, 0.5, 0.0], "intensity": 3.0}
            ]}"#,
        )
        .expect("block");
        assert_eq!(block.lights.len(), 2);

        let spot: &LightDefinition = &block.lights[0];
        assert_eq!(spot.kind, LightType::Spot);
        assert_eq!(spot.color, [1.0, 1.0, 1.0]);
        assert_eq!(spot.intensity, 1.0);
        assert_eq!(spot.spot.as_ref().expect("spot").inner_cone_angle, 0.0);
        assert_eq!(spot.spot.as_ref().expect("spot").outer_cone_angle, 0.5);

        assert_eq!(block.lights[1].kind, LightType::Directional);
        assert_eq!(block.lights[1].intensity, 3.0);
    }
}
