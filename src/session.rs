//! The loader facade and the per-load session.
//!
//! A [`Loader`] owns the extension registry and the injected collaborators;
//! every call to [`Loader::load`] spins up one [`LoadSession`] holding the
//! parsed document graph, the memo tables and the session-scoped extension
//! instances. The session walks LOADING to READY (primary scene content
//! materialized) to COMPLETE (deferred work and extension completions done);
//! a failed load ends in ERROR, a disposed one in DISPOSED.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use log::{debug, trace, warn};

use lodestar_gltf::document::types::Document;
use lodestar_gltf::glb::reader::GlbReader;

use crate::LoaderError;
use crate::document::DocumentGraph;
use crate::engine::{
    AnimationGroup, Bone, Camera, EngineTexture, Geometry, GeometryMesh, Light, Material,
    Skeleton, Topology, Transform, TransformNode,
};
use crate::extensions::{Extension, ExtensionRegistry, GuardKey, Stage, StageGuard};
use crate::io::{AssetFetcher, TextureDecoder};
use crate::resolve::cache::MemoCell;
use crate::resolve::{AccessorData, ByteWindow};

/// How the document's right-handed coordinates map onto the engine.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CoordinateSystem {
    /// Flip the Z axis on the scene root for a left-handed engine.
    #[default]
    Auto,
    /// Keep the document's handedness untouched.
    ForceRightHanded,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum AnimationStartMode {
    None,
    #[default]
    First,
    All,
}

/// An async hook rewriting URLs before the fetcher sees them.
pub type UrlPreprocessor =
    Arc<dyn Fn(&str) -> BoxFuture<'static, Result<String, LoaderError>> + Send + Sync>;

#[derive(Clone)]
pub struct LoaderOptions {
    pub coordinate_system: CoordinateSystem,
    pub animation_start: AnimationStartMode,
    /// Per-use engine meshes (sharing resolved geometry) instead of one
    /// shared mesh per document primitive.
    pub create_instances: bool,
    /// Compute bounds from positions even when the document declares min/max.
    pub always_compute_bounds: bool,
    pub skip_materials: bool,
    /// Sample color-bearing textures as sRGB.
    pub use_srgb_buffers: bool,
    /// Frame rate cubic-spline tangents are scaled against.
    pub target_fps: f32,
    /// Ignore a declared skeleton root and always compute the joints'
    /// nearest common ancestor.
    pub always_compute_skeleton_root: bool,
    pub preprocess_url: Option<UrlPreprocessor>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            coordinate_system: CoordinateSystem::default(),
            animation_start: AnimationStartMode::default(),
            create_instances: true,
            always_compute_bounds: false,
            skip_materials: false,
            use_srgb_buffers: true,
            target_fps: 60.0,
            always_compute_skeleton_root: false,
            preprocess_url: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoaderState {
    Loading,
    Ready,
    Complete,
    Error,
    Disposed,
}

#[derive(Debug, Clone)]
pub enum LoaderEvent {
    Parsed,
    ExtensionLoaded(String),
    MeshCreated(Arc<GeometryMesh>),
    TextureCreated(Arc<EngineTexture>),
    MaterialCreated(Arc<Material>),
    CameraCreated(Arc<Camera>),
    StateChanged(LoaderState),
    Error(LoaderError),
    Disposed,
}

pub type EventObserver = Box<dyn Fn(&LoaderEvent) + Send + Sync>;

#[derive(Default)]
struct Observers {
    observers: Mutex<Vec<EventObserver>>,
}

impl Observers {
    fn notify(&self, event: &LoaderEvent) {
        for observer in self.observers.lock().expect("observer lock").iter() {
            observer(event);
        }
    }
}

/// Work that has to wait until the whole node hierarchy exists.
pub(crate) enum DeferredAction {
    LinkBone(Arc<Bone>),
}

#[derive(Default)]
pub(crate) struct ResolutionCaches {
    pub buffers: MemoCell<Arc<Vec<u8>>>,
    pub buffer_views: MemoCell<ByteWindow>,
    pub accessors: MemoCell<Arc<AccessorData>>,
    pub indices: MemoCell<Arc<Vec<u32>>>,
    pub textures: MemoCell<Arc<EngineTexture>>,
    pub materials: MemoCell<Arc<Material>>,
    pub geometries: MemoCell<Arc<Geometry>>,
    pub meshes: MemoCell<Arc<GeometryMesh>>,
    pub skins: MemoCell<Arc<Skeleton>>,
    pub cameras: MemoCell<Arc<Camera>>,
    pub animations: MemoCell<Arc<AnimationGroup>>,
}

impl ResolutionCaches {
    fn clear(&self) {
        self.buffers.clear();
        self.buffer_views.clear();
        self.accessors.clear();
        self.indices.clear();
        self.textures.clear();
        self.materials.clear();
        self.geometries.clear();
        self.meshes.clear();
        self.skins.clear();
        self.cameras.clear();
        self.animations.clear();
    }
}

#[derive(Default)]
pub(crate) struct PerfCounters {
    buffers: AtomicUsize,
    accessors: AtomicUsize,
    textures: AtomicUsize,
    materials: AtomicUsize,
    meshes: AtomicUsize,
    nodes: AtomicUsize,
    skins: AtomicUsize,
    animations: AtomicUsize,
}

impl PerfCounters {
    pub(crate) fn buffers_resolved(&self) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn accessors_resolved(&self) {
        self.accessors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn textures_resolved(&self) {
        self.textures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn materials_resolved(&self) {
        self.materials.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn meshes_resolved(&self) {
        self.meshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn nodes_resolved(&self) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skins_resolved(&self) {
        self.skins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn animations_resolved(&self) {
        self.animations.fetch_add(1, Ordering::Relaxed);
    }

    fn log_summary(&self, elapsed_ms: f64) {
        debug!(
            "Load took {:.1} ms: {} buffers, {} accessors, {} textures, {} materials, \
             {} meshes, {} nodes, {} skins, {} animations",
            elapsed_ms,
            self.buffers.load(Ordering::Relaxed),
            self.accessors.load(Ordering::Relaxed),
            self.textures.load(Ordering::Relaxed),
            self.materials.load(Ordering::Relaxed),
            self.meshes.load(Ordering::Relaxed),
            self.nodes.load(Ordering::Relaxed),
            self.skins.load(Ordering::Relaxed),
            self.animations.load(Ordering::Relaxed),
        );
    }
}

#[derive(Default)]
struct Collected {
    meshes: Mutex<Vec<Arc<GeometryMesh>>>,
    skeletons: Mutex<Vec<Arc<Skeleton>>>,
    animations: Mutex<Vec<Arc<AnimationGroup>>>,
    cameras: Mutex<Vec<Arc<Camera>>>,
    lights: Mutex<Vec<Arc<Light>>>,
}

/// Everything a finished load hands back to the engine.
pub struct LoadResult {
    /// Synthetic scene root carrying the coordinate-system correction.
    pub root: Arc<TransformNode>,
    /// Materialized document nodes in index order.
    pub nodes: Vec<Arc<TransformNode>>,
    pub meshes: Vec<Arc<GeometryMesh>>,
    pub skeletons: Vec<Arc<Skeleton>>,
    pub animation_groups: Vec<Arc<AnimationGroup>>,
    pub cameras: Vec<Arc<Camera>>,
    pub lights: Vec<Arc<Light>>,
}

impl Debug for LoadResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LoadResult {{ nodes: {}, meshes: {}, skeletons: {}, animation_groups: {}, \
             cameras: {}, lights: {} }}",
            self.nodes.len(),
            self.meshes.len(),
            self.skeletons.len(),
            self.animation_groups.len(),
            self.cameras.len(),
            self.lights.len(),
        )
    }
}

impl LoadResult {
    /// Distinct geometries behind the meshes.
    pub fn geometries(&self) -> Vec<Arc<Geometry>> {
        let mut geometries: Vec<Arc<Geometry>> = Vec::new();
        for mesh in &self.meshes {
            if !geometries
                .iter()
                .any(|g| Arc::ptr_eq(g, &mesh.geometry))
            {
                geometries.push(mesh.geometry.clone());
            }
        }
        geometries
    }
}

/// The facade. Owns the registry and the collaborators; stateless across
/// loads, every load gets a fresh session.
pub struct Loader {
    registry: ExtensionRegistry,
    options: LoaderOptions,
    fetcher: Arc<dyn AssetFetcher>,
    decoder: Arc<dyn TextureDecoder>,
}

impl Loader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, decoder: Arc<dyn TextureDecoder>) -> Self {
        Self {
            registry: ExtensionRegistry::with_defaults(),
            options: LoaderOptions::default(),
            fetcher,
            decoder,
        }
    }

    pub fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Parses `data` (binary container or raw JSON text) into a session
    /// without resolving anything, so observers can be attached first.
    pub fn open(&self, data: &[u8]) -> Result<LoadSession, LoaderError> {
        LoadSession::new(
            data,
            self.options.clone(),
            self.registry.instantiate(),
            self.fetcher.clone(),
            self.decoder.clone(),
        )
    }

    pub async fn load(&self, data: &[u8]) -> Result<LoadResult, LoaderError> {
        self.open(data)?.run().await
    }
}

pub struct LoadSession {
    graph: DocumentGraph,
    pub(crate) bin: Option<Arc<Vec<u8>>>,
    pub options: LoaderOptions,
    pub(crate) fetcher: Arc<dyn AssetFetcher>,
    pub(crate) decoder: Arc<dyn TextureDecoder>,
    extensions: Vec<Box<dyn Extension>>,
    guards: DashSet<GuardKey>,
    pub(crate) caches: ResolutionCaches,
    /// Materialized nodes by document index. A plain visited-map rather than
    /// a memo cell so reentrant extension callbacks cannot deadlock on an
    /// in-flight slot.
    pub(crate) nodes: DashMap<usize, Arc<TransformNode>>,
    pub(crate) bones: DashMap<usize, Arc<Bone>>,
    pub(crate) default_materials: DashMap<Topology, Arc<Material>>,
    deferred: Mutex<Vec<DeferredAction>>,
    state: RwLock<LoaderState>,
    disposed: AtomicBool,
    observers: Observers,
    collected: Collected,
    pub(crate) counters: PerfCounters,
}

impl LoadSession {
    fn new(
        data: &[u8],
        options: LoaderOptions,
        extensions: Vec<Box<dyn Extension>>,
        fetcher: Arc<dyn AssetFetcher>,
        decoder: Arc<dyn TextureDecoder>,
    ) -> Result<Self, LoaderError> {
        let (json, bin) = if GlbReader::is_binary(data) {
            let glb = GlbReader::parse(data)?;
            (glb.json, glb.bin.map(|body| Arc::new(body.into_inner())))
        } else {
            let json = std::str::from_utf8(data)
                .map_err(|e| LoaderError::Format(e.to_string()))?
                .to_owned();
            (json, None)
        };

        let document = Document::from_json(&json)?;
        let graph = DocumentGraph::build(document)?;

        Ok(Self {
            graph,
            bin,
            options,
            fetcher,
            decoder,
            extensions,
            guards: DashSet::new(),
            caches: ResolutionCaches::default(),
            nodes: DashMap::new(),
            bones: DashMap::new(),
            default_materials: DashMap::new(),
            deferred: Mutex::new(Vec::new()),
            state: RwLock::new(LoaderState::Loading),
            disposed: AtomicBool::new(false),
            observers: Observers::default(),
            collected: Collected::default(),
            counters: PerfCounters::default(),
        })
    }

    pub fn graph(&self) -> &DocumentGraph {
        &self.graph
    }

    pub fn state(&self) -> LoaderState {
        *self.state.read().expect("state lock")
    }

    pub fn observe(&self, observer: EventObserver) {
        self.observers.observers.lock().expect("observer lock").push(observer);
    }

    pub fn emit(&self, event: LoaderEvent) {
        self.observers.notify(&event);
    }

    fn set_state(&self, state: LoaderState) {
        *self.state.write().expect("state lock") = state;
        self.emit(LoaderEvent::StateChanged(state));
    }

    pub(crate) fn check_disposed(&self) -> Result<(), LoaderError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(LoaderError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Runs the sorted extension chain for one stage/entity. The first
    /// `Some` claims the stage; an error from a claiming extension is the
    /// stage's failure. An extension calling back into the loader for the
    /// same entity skips itself via the guard and falls through.
    pub(crate) async fn apply_extensions<'s, R, F>(
        &'s self,
        stage: Stage,
        entity: u64,
        hook: F,
    ) -> Result<Option<R>, LoaderError>
    where
        F: Fn(&'s dyn Extension, &'s LoadSession) -> crate::extensions::Hook<'s, R>,
    {
        for (slot, extension) in self.extensions.iter().enumerate() {
            if !extension.enabled() {
                continue;
            }
            let Some(_guard) = StageGuard::acquire(&self.guards, (slot, stage, entity)) else {
                continue;
            };
            match hook(extension.as_ref(), self).await? {
                Some(value) => {
                    trace!(
                        "Extension '{}' claimed {:?} for entity {}",
                        extension.name(),
                        stage,
                        entity
                    );
                    return Ok(Some(value));
                }
                None => continue,
            }
        }
        Ok(None)
    }

    pub(crate) fn push_deferred(&self, action: DeferredAction) {
        self.deferred.lock().expect("deferred lock").push(action);
    }

    /// Drains the post-hierarchy queue once, in append order.
    fn drain_deferred(&self) {
        let actions = std::mem::take(&mut *self.deferred.lock().expect("deferred lock"));
        for action in actions {
            match action {
                DeferredAction::LinkBone(bone) => match self.nodes.get(&bone.node_index) {
                    Some(node) => {
                        *bone.linked_node.write().expect("linked node lock") = Some(node.clone());
                    }
                    None => warn!(
                        "Joint node {} was never materialized, bone '{}' stays unlinked",
                        bone.node_index, bone.name
                    ),
                },
            }
        }
    }

    fn record<T>(list: &Mutex<Vec<Arc<T>>>, value: Arc<T>) {
        let mut list = list.lock().expect("collected lock");
        // Claimed-and-reentrant paths can offer the same instance twice.
        if !list.iter().any(|existing| Arc::ptr_eq(existing, &value)) {
            list.push(value);
        }
    }

    pub(crate) fn record_mesh(&self, mesh: Arc<GeometryMesh>) {
        Self::record(&self.collected.meshes, mesh);
    }

    pub(crate) fn record_skeleton(&self, skeleton: Arc<Skeleton>) {
        Self::record(&self.collected.skeletons, skeleton);
    }

    pub(crate) fn record_animation(&self, group: Arc<AnimationGroup>) {
        Self::record(&self.collected.animations, group);
    }

    pub(crate) fn record_camera(&self, camera: Arc<Camera>) {
        Self::record(&self.collected.cameras, camera);
    }

    /// Extensions attaching lights register them here so the load result can
    /// expose them.
    pub fn record_light(&self, light: Arc<Light>) {
        Self::record(&self.collected.lights, light);
    }

    pub async fn run(&self) -> Result<LoadResult, LoaderError> {
        let started = Instant::now();
        match self.run_inner().await {
            Ok(result) => {
                self.counters.log_summary(started.elapsed().as_secs_f64() * 1000.0);
                Ok(result)
            }
            Err(error) => {
                self.set_state(LoaderState::Error);
                self.emit(LoaderEvent::Error(error.clone()));
                Err(error)
            }
        }
    }

    async fn run_inner(&self) -> Result<LoadResult, LoaderError> {
        self.check_disposed()?;
        for extension in &self.extensions {
            self.emit(LoaderEvent::ExtensionLoaded(extension.name().to_owned()));
        }

        // Required extensions are checked before any node resolution.
        for required in &self.graph.document().extensions_required {
            if !self.extensions.iter().any(|ext| ext.name() == required) {
                return Err(LoaderError::MissingExtension(required.clone()));
            }
        }
        self.emit(LoaderEvent::Parsed);

        let root = if self.graph.document().scenes.is_empty() {
            warn!("Document declares no scenes, producing an empty root");
            TransformNode::new(None, "scene".to_owned(), Transform::IDENTITY)
        } else {
            let scene_index = self.graph.document().scene.unwrap_or(0);
            self.resolve_scene(scene_index).await?
        };

        for index in 0..self.graph.document().animations.len() {
            self.resolve_animation(index).await?;
        }

        self.drain_deferred();
        self.set_state(LoaderState::Ready);

        let animation_groups = self.collected.animations.lock().expect("collected lock").clone();
        match self.options.animation_start {
            AnimationStartMode::None => {}
            AnimationStartMode::First => {
                if let Some(first) = animation_groups.first() {
                    first.start();
                }
            }
            AnimationStartMode::All => {
                for group in &animation_groups {
                    group.start();
                }
            }
        }

        for extension in &self.extensions {
            if let Some(completion) = extension.completion(self) {
                completion.await?;
            }
        }
        self.set_state(LoaderState::Complete);

        let mut nodes: Vec<(usize, Arc<TransformNode>)> = self
            .nodes
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        nodes.sort_by_key(|(index, _)| *index);

        Ok(LoadResult {
            root,
            nodes: nodes.into_iter().map(|(_, node)| node).collect(),
            meshes: self.collected.meshes.lock().expect("collected lock").clone(),
            skeletons: self.collected.skeletons.lock().expect("collected lock").clone(),
            animation_groups,
            cameras: self.collected.cameras.lock().expect("collected lock").clone(),
            lights: self.collected.lights.lock().expect("collected lock").clone(),
        })
    }

    /// Marks the session disposed. In-flight continuations observe the flag
    /// and become no-ops; the memo tables are released.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for extension in &self.extensions {
            extension.dispose();
        }
        self.caches.clear();
        self.nodes.clear();
        self.bones.clear();
        self.set_state(LoaderState::Disposed);
        self.emit(LoaderEvent::Disposed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fetch::{FileFetcher, RawTextureDecoder};

    fn empty_session() -> LoadSession {
        Loader::new(Arc::new(FileFetcher::new(".")), Arc::new(RawTextureDecoder {}))
            .open(br#"{"asset":{"version":"2.0"}}"#)
            .expect("open")
    }

    #[test]
    fn deferred_actions_drain_in_append_order() {
        let session = empty_session();

        // Queue bones out of index order; the queue must keep append order.
        let bones: Vec<Arc<Bone>> = [2usize, 0, 1]
            .into_iter()
            .map(|index| {
                session.nodes.insert(
                    index,
                    TransformNode::new(Some(index), format!("node-{index}"), Transform::IDENTITY),
                );
                let bone = Bone::new(format!("bone-{index}"), index);
                session.push_deferred(DeferredAction::LinkBone(bone.clone()));
                bone
            })
            .collect();

        let queued: Vec<usize> = session
            .deferred
            .lock()
            .expect("deferred lock")
            .iter()
            .map(|DeferredAction::LinkBone(bone)| bone.node_index)
            .collect();
        assert_eq!(queued, vec![2, 0, 1]);

        session.drain_deferred();

        assert!(session.deferred.lock().expect("deferred lock").is_empty());
        for bone in &bones {
            let linked = bone.linked_node.read().expect("linked node lock");
            assert_eq!(linked.as_ref().expect("linked node").index, Some(bone.node_index));
        }
    }

    #[test]
    fn unmaterialized_joint_leaves_its_bone_unlinked() {
        let session = empty_session();
        let bone = Bone::new("floating".to_owned(), 7);
        session.push_deferred(DeferredAction::LinkBone(bone.clone()));
        session.drain_deferred();
        assert!(bone.linked_node.read().expect("linked node lock").is_none());
    }
}
