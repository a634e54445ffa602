use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use log::warn;

use crate::LoaderError;
use crate::extensions::Stage;
use crate::io::scheme::Scheme;
use crate::resolve::ByteWindow;
use crate::session::LoadSession;

impl LoadSession {
    /// Raw bytes of a buffer. URI buffers go through the fetch pipeline,
    /// the URI-less buffer is the container's embedded binary body.
    pub async fn resolve_buffer(&self, index: usize) -> Result<Arc<Vec<u8>>, LoaderError> {
        let key = index as u64;
        if let Some(hit) = self.caches.buffers.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Buffer, key, |ext, ctx| ext.load_buffer(ctx, index))
            .await?
        {
            self.caches.buffers.store_if_vacant(key, Ok(claimed.clone()));
            return Ok(claimed);
        }
        // Default resolutions are boxed everywhere: unboxed, the whole
        // dependency chain accumulates in a single caller frame.
        self.caches
            .buffers
            .get_or_resolve(key, Box::pin(self.load_buffer_default(index)))
            .await
    }

    async fn load_buffer_default(&self, index: usize) -> Result<Arc<Vec<u8>>, LoaderError> {
        self.check_disposed()?;
        let buffer = self.graph().buffer(index)?;
        let path = format!("/buffers/{}", index);

        let bytes = match &buffer.uri {
            None => match &self.bin {
                Some(bin) => bin.clone(),
                None => {
                    return Err(LoaderError::reference(
                        path,
                        "buffer has no URI and the container carries no binary body",
                    ));
                }
            },
            Some(uri) => match Scheme::parse(uri)? {
                Scheme::Data(_, data) => Arc::new(data),
                Scheme::Remote(url) => Arc::new(self.fetch_uri(url).await?),
            },
        };

        if bytes.len() != buffer.byte_length {
            // Only fatal once a view actually slices past the real end.
            warn!(
                "{}: declared byteLength {} but {} bytes are available",
                path,
                buffer.byte_length,
                bytes.len()
            );
        }

        self.counters.buffers_resolved();
        Ok(bytes)
    }

    /// The extension-interceptable fetch pipeline: FetchUri stage, then the
    /// session's URL-preprocessing hook, then the injected fetcher.
    pub async fn fetch_uri(&self, url: &str) -> Result<Vec<u8>, LoaderError> {
        self.check_disposed()?;

        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        let entity = hasher.finish();

        if let Some(claimed) = self
            .apply_extensions(Stage::FetchUri, entity, |ext, ctx| ext.fetch_uri(ctx, url))
            .await?
        {
            return Ok(claimed);
        }

        let url = match &self.options.preprocess_url {
            Some(hook) => hook(url).await?,
            None => url.to_owned(),
        };
        self.fetcher.fetch(&url).await
    }

    /// A read-only window into the parent buffer, memoized per buffer view.
    pub async fn resolve_buffer_view(&self, index: usize) -> Result<ByteWindow, LoaderError> {
        let key = index as u64;
        if let Some(hit) = self.caches.buffer_views.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::BufferView, key, |ext, ctx| {
                ext.load_buffer_view(ctx, index)
            })
            .await?
        {
            self.caches
                .buffer_views
                .store_if_vacant(key, Ok(claimed.clone()));
            return Ok(claimed);
        }
        self.caches
            .buffer_views
            .get_or_resolve(key, Box::pin(self.load_buffer_view_default(index)))
            .await
    }

    async fn load_buffer_view_default(&self, index: usize) -> Result<ByteWindow, LoaderError> {
        let view = self.graph().buffer_view(index)?;
        let buffer = self.resolve_buffer(view.buffer).await?;
        ByteWindow::new(
            buffer,
            view.byte_offset,
            view.byte_length,
            &format!("/bufferViews/{}", index),
        )
    }
}
