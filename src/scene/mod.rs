//! The scene-graph assembler: turns resolved resources into the engine object
//! model. Nodes materialize recursively with their transforms applied and the
//! parent link set before children resolve; meshes, skins, cameras and
//! animations hang off the node pass. Everything dispatches through the
//! extension stages first and memoizes like the raw resource resolvers.

mod animation;
mod material;
mod mesh;
mod node;
mod skin;
