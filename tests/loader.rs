//! End-to-end loads through the public facade, driving real containers
//! through the full session pipeline.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use serde_json::json;

use lodestar::LoaderError;
use lodestar::engine::{Camera, CameraProjection, Topology};
use lodestar::extensions::{Extension, Hook};
use lodestar::io::fetch::RawTextureDecoder;
use lodestar::io::AssetFetcher;
use lodestar::session::{AnimationStartMode, Loader, LoaderOptions, LoaderState, LoadSession};
use lodestar_gltf::glb::reader::GlbReader;
use lodestar_gltf::glb::writer::GlbWriter;

/// Serves one fixed payload for every URL and counts the fetches.
struct CountingFetcher {
    payload: Vec<u8>,
    fetches: AtomicUsize,
}

impl CountingFetcher {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            fetches: AtomicUsize::new(0),
        }
    }
}

impl AssetFetcher for CountingFetcher {
    fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoaderError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let payload = self.payload.clone();
        Box::pin(async move { Ok(payload) })
    }
}

/// Fails every fetch; for documents that must resolve without I/O.
struct NoFetcher;

impl AssetFetcher for NoFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoaderError>> {
        Box::pin(async move {
            Err(LoaderError::Fetch {
                url: url.to_owned(),
                detail: "no fetcher in this test".to_owned(),
            })
        })
    }
}

fn loader(fetcher: Arc<dyn AssetFetcher>) -> Loader {
    Loader::new(fetcher, Arc::new(RawTextureDecoder {}))
}

fn pack(json: &serde_json::Value, bin: Option<&[u8]>) -> Vec<u8> {
    let mut packed = Vec::new();
    GlbWriter::write(&mut packed, &json.to_string(), bin).expect("packing test container");
    packed
}

fn f32s(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A one-triangle container: positions at view 0, u16 indices at view 1.
fn triangle_glb() -> Vec<u8> {
    let mut bin = f32s(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    bin.extend_from_slice(&0u16.to_le_bytes());
    bin.extend_from_slice(&1u16.to_le_bytes());
    bin.extend_from_slice(&2u16.to_le_bytes());
    bin.extend_from_slice(&[0; 2]);

    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0, "name": "triangle"}],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}, "indices": 1}]}],
        "buffers": [{"byteLength": 44}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 6}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
             "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}
        ]
    });
    pack(&document, Some(&bin))
}

#[tokio::test]
async fn single_triangle_resolves_end_to_end() -> anyhow::Result<()> {
    let loader = loader(Arc::new(NoFetcher));
    let result = loader.load(&triangle_glb()).await?;

    assert_eq!(result.meshes.len(), 1);
    let mesh = &result.meshes[0];
    assert_eq!(mesh.geometry.topology, Topology::Triangles);
    assert_eq!(mesh.geometry.indices, vec![0, 1, 2]);
    assert!(!mesh.geometry.unindexed);
    assert_eq!(mesh.geometry.vertex_buffers.positions.len(), 3);

    let material = mesh
        .material
        .read()
        .expect("material lock")
        .clone()
        .expect("default material");
    assert_eq!(material.name, "default");

    assert_eq!(result.nodes.len(), 1);
    assert_eq!(result.nodes[0].name, "triangle");
    Ok(())
}

#[tokio::test]
async fn repeated_loads_materialize_identically() -> anyhow::Result<()> {
    let container = triangle_glb();
    let loader = loader(Arc::new(NoFetcher));

    let first = loader.load(&container).await?;
    let second = loader.load(&container).await?;

    let names = |result: &lodestar::session::LoadResult| {
        result
            .nodes
            .iter()
            .map(|n| (n.index, n.name.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(first.meshes.len(), second.meshes.len());
    assert_eq!(
        first.meshes[0].geometry.indices,
        second.meshes[0].geometry.indices
    );
    Ok(())
}

#[tokio::test]
async fn shared_uri_buffer_is_fetched_once() -> anyhow::Result<()> {
    // Two primitives on two nodes, four accessors, one external buffer.
    let payload = f32s(&[
        0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
        2.0, 0.0, 0.0, 3.0, 0.0, 0.0, 2.0, 1.0, 0.0,
    ]);
    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0, 1]}],
        "nodes": [{"mesh": 0}, {"mesh": 1}],
        "meshes": [
            {"primitives": [{"attributes": {"POSITION": 0}}]},
            {"primitives": [{"attributes": {"POSITION": 1}}]}
        ],
        "buffers": [{"uri": "shared.bin", "byteLength": 72}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 36}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"},
            {"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3"}
        ]
    });

    let fetcher = Arc::new(CountingFetcher::new(payload));
    let result = loader(fetcher.clone())
        .load(document.to_string().as_bytes())
        .await?;

    assert_eq!(result.meshes.len(), 2);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn sparse_overlay_replaces_base_elements() -> anyhow::Result<()> {
    // Base: three zero vertices. Sparse: element 1 becomes (1, 2, 3).
    let mut bin = f32s(&[0.0; 9]);
    bin.extend_from_slice(&1u16.to_le_bytes());
    bin.extend_from_slice(&[0; 2]);
    bin.extend(f32s(&[1.0, 2.0, 3.0]));

    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
        "buffers": [{"byteLength": 52}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 2},
            {"buffer": 0, "byteOffset": 40, "byteLength": 12}
        ],
        "accessors": [{
            "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
            "sparse": {
                "count": 1,
                "indices": {"bufferView": 1, "componentType": 5123},
                "values": {"bufferView": 2}
            }
        }]
    });

    let result = loader(Arc::new(NoFetcher))
        .load(&pack(&document, Some(&bin)))
        .await?;

    let positions = &result.meshes[0].geometry.vertex_buffers.positions;
    assert_eq!(positions[0], glam::Vec3::ZERO);
    assert_eq!(positions[1], glam::Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(positions[2], glam::Vec3::ZERO);
    Ok(())
}

#[tokio::test]
async fn mutually_parented_nodes_fail_as_a_cycle() {
    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [
            {"name": "a", "children": [1]},
            {"name": "b", "children": [0]}
        ]
    });

    let error = loader(Arc::new(NoFetcher))
        .load(document.to_string().as_bytes())
        .await
        .expect_err("cyclic hierarchy must fail");
    assert!(matches!(error, LoaderError::CircularHierarchy { .. }));
}

#[tokio::test]
async fn node_sharing_is_not_mistaken_for_a_cycle() -> anyhow::Result<()> {
    // A diamond: both parents reference child 3; it must materialize once.
    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [
            {"children": [1, 2]},
            {"children": [3]},
            {"children": [3]},
            {"name": "shared"}
        ]
    });

    let result = loader(Arc::new(NoFetcher))
        .load(document.to_string().as_bytes())
        .await?;
    assert_eq!(
        result.nodes.iter().filter(|n| n.name == "shared").count(),
        1
    );
    Ok(())
}

fn skinned_document(joints: Vec<usize>, skeleton: Option<usize>) -> serde_json::Value {
    // 0 -> 1 -> {2, 3}; node 4 carries the skinned mesh.
    let mut skin = json!({"joints": joints});
    if let Some(skeleton) = skeleton {
        skin["skeleton"] = json!(skeleton);
    }
    json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0, 4]}],
        "nodes": [
            {"children": [1], "name": "root"},
            {"children": [2, 3], "name": "hip"},
            {"name": "left"},
            {"name": "right"},
            {"mesh": 0, "skin": 0}
        ],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
        "skins": [skin],
        "buffers": [{"uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", "byteLength": 36}],
        "bufferViews": [{"buffer": 0, "byteOffset": 0, "byteLength": 36}],
        "accessors": [{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"}]
    })
}

#[tokio::test]
async fn skeleton_root_is_the_joints_nearest_common_ancestor() -> anyhow::Result<()> {
    let document = skinned_document(vec![2, 3], None);
    let result = loader(Arc::new(NoFetcher))
        .load(document.to_string().as_bytes())
        .await?;

    assert_eq!(result.skeletons.len(), 1);
    let skeleton = &result.skeletons[0];
    assert_eq!(skeleton.root_node, 1);
    assert_eq!(skeleton.bones.len(), 2);
    // The deferred pass linked each bone to its materialized node.
    for bone in &skeleton.bones {
        let linked = bone.linked_node.read().expect("linked node lock");
        assert_eq!(linked.as_ref().expect("linked node").index, Some(bone.node_index));
    }
    Ok(())
}

#[tokio::test]
async fn joint_that_is_an_ancestor_of_the_other_is_its_own_root() -> anyhow::Result<()> {
    let document = skinned_document(vec![1, 2], None);
    let result = loader(Arc::new(NoFetcher))
        .load(document.to_string().as_bytes())
        .await?;
    assert_eq!(result.skeletons[0].root_node, 1);

    // A parent link from the nested joint to the ancestor joint.
    let nested = &result.skeletons[0].bones[1];
    let parent = nested.parent.read().expect("parent lock");
    assert_eq!(parent.as_ref().expect("parent bone").node_index, 1);
    Ok(())
}

#[test]
fn container_roundtrip_preserves_the_json() {
    let json = r#"{"asset":{"version":"2.0"} }"#;
    let mut packed = Vec::new();
    GlbWriter::write(&mut packed, json, None).expect("pack");

    assert!(GlbReader::is_binary(&packed));
    let glb = GlbReader::parse(&packed).expect("unpack");
    assert_eq!(glb.json, json);
    assert!(glb.bin.is_none());
}

struct ClaimingCamera {
    name: &'static str,
    order: i32,
    invocations: Arc<Mutex<Vec<&'static str>>>,
}

impl Extension for ClaimingCamera {
    fn name(&self) -> &str {
        self.name
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn load_camera<'a>(&'a self, _ctx: &'a LoadSession, _index: usize) -> Hook<'a, Arc<Camera>> {
        Box::pin(async move {
            self.invocations.lock().expect("invocation lock").push(self.name);
            Ok(Some(Arc::new(Camera {
                name: self.name.to_owned(),
                projection: CameraProjection::Orthographic {
                    xmag: 1.0,
                    ymag: 1.0,
                    znear: 0.1,
                    zfar: 10.0,
                },
            })))
        })
    }
}

#[tokio::test]
async fn lowest_order_extension_claims_and_short_circuits() -> anyhow::Result<()> {
    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"camera": 0}],
        "cameras": [{"type": "perspective", "perspective": {"yfov": 1.0, "znear": 0.1}}]
    });

    let invocations = Arc::new(Mutex::new(Vec::new()));
    let loader = loader(Arc::new(NoFetcher));

    // Registered high-order first; dispatch must still run order 10 first.
    let late = invocations.clone();
    loader.registry().register(
        "test_late",
        Box::new(move || {
            Box::new(ClaimingCamera {
                name: "twenty",
                order: 20,
                invocations: late.clone(),
            })
        }),
    );
    let early = invocations.clone();
    loader.registry().register(
        "test_early",
        Box::new(move || {
            Box::new(ClaimingCamera {
                name: "ten",
                order: 10,
                invocations: early.clone(),
            })
        }),
    );

    let result = loader.load(document.to_string().as_bytes()).await?;

    assert_eq!(result.cameras.len(), 1);
    assert_eq!(result.cameras[0].name, "ten");
    assert_eq!(*invocations.lock().expect("invocation lock"), vec!["ten"]);
    Ok(())
}

#[tokio::test]
async fn unregistered_required_extension_fails_before_resolution() {
    let document = json!({
        "asset": {"version": "2.0"},
        "extensionsRequired": ["EXT_not_shipped"],
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"name": "never_resolved"}]
    });

    let error = loader(Arc::new(NoFetcher))
        .load(document.to_string().as_bytes())
        .await
        .expect_err("load must fail");
    match error {
        LoaderError::MissingExtension(name) => assert_eq!(name, "EXT_not_shipped"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn weights_channel_fans_out_per_morph_target() -> anyhow::Result<()> {
    // positions (36 bytes), times (12), weight values for 3 keys x 2 targets (24).
    let mut bin = f32s(&[0.0; 9]);
    bin.extend(f32s(&[0.0, 0.5, 1.0]));
    bin.extend(f32s(&[0.1, 0.9, 0.2, 0.8, 0.3, 0.7]));

    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "meshes": [{"primitives": [{
            "attributes": {"POSITION": 0},
            "targets": [{"POSITION": 3}, {"POSITION": 3}]
        }]}],
        "buffers": [{"byteLength": 72}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 12},
            {"buffer": 0, "byteOffset": 48, "byteLength": 24}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"},
            {"bufferView": 1, "componentType": 5126, "count": 3, "type": "SCALAR"},
            {"bufferView": 2, "componentType": 5126, "count": 6, "type": "SCALAR"},
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"}
        ],
        "animations": [{
            "channels": [{"sampler": 0, "target": {"node": 0, "path": "weights"}}],
            "samplers": [{"input": 1, "output": 2, "interpolation": "LINEAR"}]
        }]
    });

    let loader = loader(Arc::new(NoFetcher)).with_options(LoaderOptions {
        animation_start: AnimationStartMode::All,
        ..LoaderOptions::default()
    });
    let result = loader.load(&pack(&document, Some(&bin))).await?;

    assert_eq!(result.animation_groups.len(), 1);
    let group = &result.animation_groups[0];
    assert_eq!(group.tracks.len(), 2);
    assert!(group.tracks.iter().all(|track| track.keys.len() == 3));
    assert!(group.is_playing());
    Ok(())
}

#[tokio::test]
async fn punctual_lights_attach_through_the_node_stage() -> anyhow::Result<()> {
    let document = json!({
        "asset": {"version": "2.0"},
        "extensionsUsed": ["KHR_lights_punctual"],
        "extensions": {
            "KHR_lights_punctual": {
                "lights": [{"type": "point", "intensity": 2.0, "name": "bulb"}]
            }
        },
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{
            "name": "lamp",
            "extensions": {"KHR_lights_punctual": {"light": 0}}
        }]
    });

    let result = loader(Arc::new(NoFetcher))
        .load(document.to_string().as_bytes())
        .await?;

    assert_eq!(result.lights.len(), 1);
    assert_eq!(result.lights[0].name, "bulb");
    assert_eq!(result.lights[0].intensity, 2.0);

    let lamp = &result.nodes[0];
    assert_eq!(lamp.name, "lamp");
    assert!(lamp.light.read().expect("light lock").is_some());
    Ok(())
}

#[tokio::test]
async fn disposed_session_refuses_to_run() -> anyhow::Result<()> {
    let loader = loader(Arc::new(NoFetcher));
    let session = loader.open(&triangle_glb())?;
    session.dispose();
    assert_eq!(session.state(), LoaderState::Disposed);

    let error = session.run().await.expect_err("disposed session");
    assert!(matches!(error, LoaderError::Disposed));
    Ok(())
}

#[tokio::test]
async fn session_walks_ready_to_complete() -> anyhow::Result<()> {
    let loader = loader(Arc::new(NoFetcher));
    let session = loader.open(&triangle_glb())?;

    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = states.clone();
    session.observe(Box::new(move |event| {
        if let lodestar::session::LoaderEvent::StateChanged(state) = event {
            seen.lock().expect("state lock").push(*state);
        }
    }));

    session.run().await?;
    assert_eq!(
        *states.lock().expect("state lock"),
        vec![LoaderState::Ready, LoaderState::Complete]
    );
    Ok(())
}
