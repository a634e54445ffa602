//! The indexed document graph: stable indices for every entity array plus the
//! inverted parent relation over the node tree. Derived data lives in side
//! tables here, the parsed document itself is never mutated.

use log::warn;

use lodestar_gltf::document::types::{
    Accessor, Animation, Buffer, BufferView, Camera, Document, Image, Material, Mesh, Node,
    Sampler, Scene, Skin, Texture,
};

use crate::LoaderError;

/// Parent of a node, computed once by inverting the `children` lists.
/// The synthetic root is the parent of every node no other node claims.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeParent {
    Root,
    Node(usize),
}

#[derive(Debug)]
pub struct DocumentGraph {
    document: Document,
    parents: Vec<NodeParent>,
}

impl DocumentGraph {
    /// Builds the side tables. Entity indices are the array positions and are
    /// stable for the lifetime of the graph; building the same document twice
    /// yields identical assignments.
    pub fn build(document: Document) -> Result<DocumentGraph, LoaderError> {
        let mut parents = vec![NodeParent::Root; document.nodes.len()];

        for (index, node) in document.nodes.iter().enumerate() {
            for (child_slot, &child) in node.children.iter().enumerate() {
                if child >= document.nodes.len() {
                    return Err(LoaderError::reference(
                        format!("/nodes/{}/children/{}", index, child_slot),
                        format!("child index {} is out of range", child),
                    ));
                }
                if let NodeParent::Node(previous) = parents[child] {
                    // Undefined in the source format; we keep the last writer.
                    warn!(
                        "Node {} is listed as a child of both {} and {}, keeping {}",
                        child, previous, index, index
                    );
                }
                parents[child] = NodeParent::Node(index);
            }
        }

        Ok(DocumentGraph { document, parents })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn parent(&self, node: usize) -> NodeParent {
        self.parents[node]
    }

    /// The chain from `node` up to the synthetic root, starting with the node
    /// itself. Bounded by the node count, so a cyclic parent chain terminates.
    pub fn ancestry(&self, node: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = node;
        loop {
            chain.push(current);
            match self.parents[current] {
                NodeParent::Root => break,
                NodeParent::Node(parent) => current = parent,
            }
            if chain.len() > self.document.nodes.len() {
                break;
            }
        }
        chain
    }

    pub fn is_ancestor_of(&self, ancestor: usize, node: usize) -> bool {
        self.ancestry(node).contains(&ancestor)
    }

    pub fn node(&self, index: usize) -> Result<&Node, LoaderError> {
        Self::lookup(&self.document.nodes, index, "nodes")
    }

    pub fn scene(&self, index: usize) -> Result<&Scene, LoaderError> {
        Self::lookup(&self.document.scenes, index, "scenes")
    }

    pub fn mesh(&self, index: usize) -> Result<&Mesh, LoaderError> {
        Self::lookup(&self.document.meshes, index, "meshes")
    }

    pub fn accessor(&self, index: usize) -> Result<&Accessor, LoaderError> {
        Self::lookup(&self.document.accessors, index, "accessors")
    }

    pub fn buffer_view(&self, index: usize) -> Result<&BufferView, LoaderError> {
        Self::lookup(&self.document.buffer_views, index, "bufferViews")
    }

    pub fn buffer(&self, index: usize) -> Result<&Buffer, LoaderError> {
        Self::lookup(&self.document.buffers, index, "buffers")
    }

    pub fn image(&self, index: usize) -> Result<&Image, LoaderError> {
        Self::lookup(&self.document.images, index, "images")
    }

    pub fn sampler(&self, index: usize) -> Result<&Sampler, LoaderError> {
        Self::lookup(&self.document.samplers, index, "samplers")
    }

    pub fn texture(&self, index: usize) -> Result<&Texture, LoaderError> {
        Self::lookup(&self.document.textures, index, "textures")
    }

    pub fn material(&self, index: usize) -> Result<&Material, LoaderError> {
        Self::lookup(&self.document.materials, index, "materials")
    }

    pub fn skin(&self, index: usize) -> Result<&Skin, LoaderError> {
        Self::lookup(&self.document.skins, index, "skins")
    }

    pub fn camera(&self, index: usize) -> Result<&Camera, LoaderError> {
        Self::lookup(&self.document.cameras, index, "cameras")
    }

    pub fn animation(&self, index: usize) -> Result<&Animation, LoaderError> {
        Self::lookup(&self.document.animations, index, "animations")
    }

    fn lookup<'a, T>(array: &'a [T], index: usize, kind: &str) -> Result<&'a T, LoaderError> {
        array.get(index).ok_or_else(|| {
            LoaderError::reference(
                format!("/{}/{}", kind, index),
                format!("index {} is out of range ({} elements)", index, array.len()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use lodestar_gltf::document::types::Document;

    use super::{DocumentGraph, NodeParent};

    fn graph(json: &str) -> DocumentGraph {
        DocumentGraph::build(Document::from_json(json).unwrap()).unwrap()
    }

    #[test]
    fn parents_are_inverted_children() {
        let graph = graph(
            r#"{
                "asset": {"version": "2.0"},
                "nodes": [
                    {"children": [1, 2]},
                    {"children": [3]},
                    {},
                    {}
                ]
            }"#,
        );

        assert_eq!(graph.parent(0), NodeParent::Root);
        assert_eq!(graph.parent(1), NodeParent::Node(0));
        assert_eq!(graph.parent(2), NodeParent::Node(0));
        assert_eq!(graph.parent(3), NodeParent::Node(1));
        assert_eq!(graph.ancestry(3), vec![3, 1, 0]);
        assert!(graph.is_ancestor_of(0, 3));
        assert!(!graph.is_ancestor_of(2, 3));
    }

    #[test]
    fn building_twice_is_deterministic() {
        let json = r#"{
            "asset": {"version": "2.0"},
            "nodes": [{"children": [2]}, {"children": [3]}, {}, {}]
        }"#;

        let first = graph(json);
        let second = graph(json);
        for index in 0..4 {
            assert_eq!(first.parent(index), second.parent(index));
        }
    }

    #[test]
    fn duplicate_parenthood_keeps_the_last_writer() {
        let graph = graph(
            r#"{
                "asset": {"version": "2.0"},
                "nodes": [{"children": [2]}, {"children": [2]}, {}]
            }"#,
        );

        assert_eq!(graph.parent(2), NodeParent::Node(1));
    }

    #[test]
    fn child_index_out_of_range_is_a_reference_error() {
        let document = Document::from_json(
            r#"{"asset": {"version": "2.0"}, "nodes": [{"children": [7]}]}"#,
        )
        .unwrap();
        let err = DocumentGraph::build(document).unwrap_err();
        assert!(err.to_string().contains("/nodes/0/children/0"));
    }

    #[test]
    fn lookups_report_structural_paths() {
        let graph = graph(r#"{"asset": {"version": "2.0"}}"#);
        let err = graph.mesh(3).unwrap_err();
        assert!(err.to_string().starts_with("/meshes/3"));
    }
}
