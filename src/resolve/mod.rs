//! The memoized asynchronous resolution pipeline for raw resources: buffers,
//! buffer views, accessors (with sparse overlay) and textures. Every entity
//! resolves at most once per session; concurrent requesters share the same
//! in-flight future and a stored failure is shared instead of retried.

mod accessor;
mod buffer;
pub(crate) mod cache;
mod texture;

pub use accessor::AccessorData;
pub use cache::ByteWindow;
