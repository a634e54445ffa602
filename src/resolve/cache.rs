use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::LoaderError;

/// A read-only byte range over a resolved buffer. Range-checked at creation,
/// so `bytes()` can never slice past the end.
#[derive(Debug, Clone)]
pub struct ByteWindow {
    data: Arc<Vec<u8>>,
    offset: usize,
    length: usize,
}

impl ByteWindow {
    pub fn new(
        data: Arc<Vec<u8>>,
        offset: usize,
        length: usize,
        path: &str,
    ) -> Result<Self, LoaderError> {
        if offset.checked_add(length).is_none_or(|end| end > data.len()) {
            return Err(LoaderError::reference(
                path,
                format!(
                    "byte range {}..{} exceeds the buffer length {}",
                    offset,
                    offset + length,
                    data.len()
                ),
            ));
        }
        Ok(Self {
            data,
            offset,
            length,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// One memo table of the resolver. Each slot holds the final `Result` of its
/// entity: the first resolution wins, every later (or concurrently pending)
/// requester receives a clone, and failures stay stored rather than being
/// resolved a second time.
pub(crate) struct MemoCell<T: Clone> {
    slots: DashMap<u64, Arc<OnceCell<Result<T, LoaderError>>>>,
}

impl<T: Clone> MemoCell<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    fn slot(&self, key: u64) -> Arc<OnceCell<Result<T, LoaderError>>> {
        self.slots.entry(key).or_default().clone()
    }

    /// Completed result, if any. Never blocks on an in-flight resolution.
    pub(crate) fn peek(&self, key: u64) -> Option<Result<T, LoaderError>> {
        self.slots.get(&key).and_then(|slot| slot.get().cloned())
    }

    pub(crate) async fn get_or_resolve<F>(&self, key: u64, resolve: F) -> Result<T, LoaderError>
    where
        F: Future<Output = Result<T, LoaderError>>,
    {
        let slot = self.slot(key);
        slot.get_or_init(|| resolve).await.clone()
    }

    /// Records an extension-claimed result without displacing a resolution the
    /// extension itself triggered through a reentrant callback.
    pub(crate) fn store_if_vacant(&self, key: u64, value: Result<T, LoaderError>) {
        let _ = self.slot(key).set(value);
    }

    pub(crate) fn clear(&self) {
        self.slots.clear();
    }

    #[cfg(test)]
    pub(crate) fn resolved_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }
}

impl<T: Clone> Default for MemoCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{ByteWindow, MemoCell};
    use crate::LoaderError;

    #[tokio::test]
    async fn resolves_exactly_once_per_key() {
        let memo: MemoCell<u32> = MemoCell::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = memo
                .get_or_resolve(7, async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_stored_and_shared_not_retried() {
        let memo: MemoCell<u32> = MemoCell::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..2 {
            let err = memo
                .get_or_resolve(1, async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err(LoaderError::reference("/buffers/1", "boom"))
                })
                .await
                .unwrap_err();
            assert!(matches!(err, LoaderError::Reference { .. }));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_if_vacant_does_not_displace() {
        let memo: MemoCell<u32> = MemoCell::new();
        memo.get_or_resolve(3, async { Ok(1) }).await.unwrap();
        memo.store_if_vacant(3, Ok(2));
        assert_eq!(memo.peek(3).unwrap().unwrap(), 1);

        memo.store_if_vacant(4, Ok(9));
        assert_eq!(memo.peek(4).unwrap().unwrap(), 9);
    }

    #[test]
    fn byte_window_checks_its_range() {
        let data = Arc::new(vec![0u8, 1, 2, 3, 4]);
        let window = ByteWindow::new(data.clone(), 1, 3, "/bufferViews/0").unwrap();
        assert_eq!(window.bytes(), &[1, 2, 3]);
        assert!(ByteWindow::new(data, 3, 3, "/bufferViews/0").is_err());
    }
}
