use std::path::PathBuf;

use futures::future::BoxFuture;
use log::trace;

use crate::LoaderError;
use crate::engine::TextureData;
use crate::io::{AssetFetcher, TextureDecoder};

/// Resolves relative URIs against a root directory through `tokio::fs`.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetFetcher for FileFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoaderError>> {
        Box::pin(async move {
            let path = self.root.join(url);
            trace!("Fetching {}", path.display());
            tokio::fs::read(&path).await.map_err(|e| LoaderError::Fetch {
                url: url.to_owned(),
                detail: e.to_string(),
            })
        })
    }
}

/// Hands the encoded bytes through untouched. Real engines plug a decoder that
/// produces texels in whatever layout their upload path wants.
pub struct RawTextureDecoder {}

impl TextureDecoder for RawTextureDecoder {
    fn decode<'a>(
        &'a self,
        bytes: Vec<u8>,
        mime_type: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TextureData, LoaderError>> {
        Box::pin(async move {
            Ok(TextureData {
                bytes,
                mime_type: mime_type.map(str::to_owned),
                width: None,
                height: None,
            })
        })
    }
}
