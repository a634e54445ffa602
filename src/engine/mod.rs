//! The engine-neutral object model the loader materializes documents into.
//! Rendering backends consume these types; the loader never looks past the
//! documented fields and accessors it sets.

pub mod types;

pub use types::*;
