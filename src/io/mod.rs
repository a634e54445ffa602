//! The environment collaborators the loader core depends on: something that
//! fetches bytes for a URI and something that turns image bytes into texel
//! data. Both are injected at session construction and always asynchronous.

use futures::future::BoxFuture;

use crate::LoaderError;
use crate::engine::TextureData;

pub mod fetch;
pub mod scheme;

pub use scheme::Scheme;

pub trait AssetFetcher: Send + Sync {
    /// Fetches the raw bytes behind `url`. `url` is already resolved against
    /// the session's root URL and any URL-preprocessing hook.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoaderError>>;
}

pub trait TextureDecoder: Send + Sync {
    fn decode<'a>(
        &'a self,
        bytes: Vec<u8>,
        mime_type: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TextureData, LoaderError>>;
}
