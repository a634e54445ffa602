use std::sync::Arc;

use lodestar_gltf::document::types::{MagFilter, MinFilter, Sampler, WrapMode};

use crate::LoaderError;
use crate::engine::{EngineTexture, FilterMode, MipmapMode, SamplerState};
use crate::extensions::Stage;
use crate::io::Scheme;
use crate::session::{LoadSession, LoaderEvent};

impl LoadSession {
    /// Resolves a texture in either color space. The same texture index used
    /// once as sRGB color and once as linear data yields two engine textures,
    /// so the memo key carries the color space bit.
    pub async fn resolve_texture(
        &self,
        index: usize,
        srgb: bool,
    ) -> Result<Arc<EngineTexture>, LoaderError> {
        let key = (index as u64) << 1 | srgb as u64;
        if let Some(hit) = self.caches.textures.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Texture, key, |ext, ctx| {
                ext.load_texture(ctx, index, srgb)
            })
            .await?
        {
            self.caches.textures.store_if_vacant(key, Ok(claimed.clone()));
            return Ok(claimed);
        }
        self.caches
            .textures
            .get_or_resolve(key, Box::pin(self.load_texture_default(index, srgb)))
            .await
    }

    async fn load_texture_default(
        &self,
        index: usize,
        srgb: bool,
    ) -> Result<Arc<EngineTexture>, LoaderError> {
        self.check_disposed()?;
        let texture = self.graph().texture(index)?;
        let path = format!("/textures/{}", index);

        let Some(source) = texture.source else {
            return Err(LoaderError::reference(path, "texture without a source image"));
        };
        let image = self.graph().image(source)?;

        let (bytes, embedded_mime) = match (&image.uri, image.buffer_view) {
            (Some(uri), _) => match Scheme::parse(uri)? {
                Scheme::Data(mime, data) => {
                    let mime = mime.map(str::to_owned);
                    (data, mime)
                }
                Scheme::Remote(url) => (self.fetch_uri(url).await?, None),
            },
            (None, Some(view_index)) => {
                let window = self.resolve_buffer_view(view_index).await?;
                (window.bytes().to_vec(), None)
            }
            (None, None) => {
                return Err(LoaderError::reference(
                    format!("/images/{}", source),
                    "image has neither a uri nor a buffer view",
                ));
            }
        };

        let mime_type = image.mime_type.clone().or(embedded_mime);
        let data = self.decoder.decode(bytes, mime_type.as_deref()).await?;

        let sampler = match texture.sampler {
            Some(sampler_index) => sampler_state(self.graph().sampler(sampler_index)?),
            None => SamplerState::default(),
        };

        let name = texture
            .name
            .clone()
            .or_else(|| image.name.clone())
            .unwrap_or_else(|| format!("texture_{}", index));

        let engine_texture = Arc::new(EngineTexture {
            name,
            data,
            sampler,
            srgb,
        });
        self.emit(LoaderEvent::TextureCreated(engine_texture.clone()));
        self.counters.textures_resolved();
        Ok(engine_texture)
    }
}

fn sampler_state(sampler: &Sampler) -> SamplerState {
    let mag_filter = match sampler.mag_filter {
        Some(MagFilter::Nearest) => FilterMode::Nearest,
        Some(MagFilter::Linear) | None => FilterMode::Linear,
    };
    let (min_filter, mipmap) = min_filter_state(sampler.min_filter);
    SamplerState {
        mag_filter,
        min_filter,
        mipmap,
        wrap_u: wrap_mode(sampler.wrap_s),
        wrap_v: wrap_mode(sampler.wrap_t),
    }
}

fn min_filter_state(filter: Option<MinFilter>) -> (FilterMode, MipmapMode) {
    match filter {
        Some(MinFilter::Nearest) => (FilterMode::Nearest, MipmapMode::None),
        Some(MinFilter::Linear) => (FilterMode::Linear, MipmapMode::None),
        Some(MinFilter::NearestMipmapNearest) => (FilterMode::Nearest, MipmapMode::Nearest),
        Some(MinFilter::LinearMipmapNearest) => (FilterMode::Linear, MipmapMode::Nearest),
        Some(MinFilter::NearestMipmapLinear) => (FilterMode::Nearest, MipmapMode::Linear),
        Some(MinFilter::LinearMipmapLinear) | None => (FilterMode::Linear, MipmapMode::Linear),
    }
}

fn wrap_mode(mode: WrapMode) -> crate::engine::WrapMode {
    match mode {
        WrapMode::ClampToEdge => crate::engine::WrapMode::ClampToEdge,
        WrapMode::MirroredRepeat => crate::engine::WrapMode::MirroredRepeat,
        WrapMode::Repeat => crate::engine::WrapMode::Repeat,
    }
}

#[cfg(test)]
mod tests {
    use lodestar_gltf::document::types::{MagFilter, MinFilter, Sampler, WrapMode};

    use crate::engine::{FilterMode, MipmapMode};

    use super::sampler_state;

    #[test]
    fn maps_combined_min_filters() {
        let sampler = Sampler {
            mag_filter: Some(MagFilter::Nearest),
            min_filter: Some(MinFilter::LinearMipmapNearest),
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::MirroredRepeat,
            name: None,
        };
        let state = sampler_state(&sampler);
        assert_eq!(state.mag_filter, FilterMode::Nearest);
        assert_eq!(state.min_filter, FilterMode::Linear);
        assert_eq!(state.mipmap, MipmapMode::Nearest);
        assert_eq!(state.wrap_u, crate::engine::WrapMode::ClampToEdge);
        assert_eq!(state.wrap_v, crate::engine::WrapMode::MirroredRepeat);
    }

    #[test]
    fn missing_filters_default_to_trilinear() {
        let sampler = Sampler {
            mag_filter: None,
            min_filter: None,
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            name: None,
        };
        let state = sampler_state(&sampler);
        assert_eq!(state.mag_filter, FilterMode::Linear);
        assert_eq!(state.min_filter, FilterMode::Linear);
        assert_eq!(state.mipmap, MipmapMode::Linear);
    }
}
