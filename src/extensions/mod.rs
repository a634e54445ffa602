//! The extension registry and the per-stage dispatch support types.
//!
//! Extensions are registered as factories on an explicit [`ExtensionRegistry`]
//! (no process-global state); every loader session instantiates its own set,
//! stable-sorted by ascending [`Extension::order`]. During dispatch the first
//! extension returning `Some` claims the stage and nothing after it runs, not
//! even the default. A per-(extension, stage, entity) guard lets an extension
//! call back into the loader for the same entity without recursing into
//! itself: the reentrant call skips the active extension and falls through to
//! later extensions or the default implementation.

use std::sync::{Arc, Mutex};

use dashmap::DashSet;
use futures::future::BoxFuture;
use log::warn;

use crate::LoaderError;
use crate::engine::{AnimationGroup, Camera, EngineTexture, GeometryMesh, Geometry, Material, Skeleton, TransformNode};
use crate::resolve::{AccessorData, ByteWindow};
use crate::session::LoadSession;

pub mod lights;
pub mod unlit;

/// The closed set of interceptable loading stages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    FetchUri,
    Buffer,
    BufferView,
    Accessor,
    Texture,
    Material,
    Skin,
    Primitive,
    VertexData,
    Node,
    Camera,
    Animation,
    Scene,
}

pub type Hook<'a, R> = BoxFuture<'a, Result<Option<R>, LoaderError>>;

fn defer<'a, R: Send + 'a>() -> Hook<'a, R> {
    Box::pin(async { Ok(None) })
}

/// One instance per loader session, produced by a registered factory.
/// Every hook defaults to deferring; an implementation overrides the stages it
/// cares about and returns `Ok(Some(_))` to claim one.
#[allow(unused_variables)]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    /// Dispatch position; lower runs earlier. Ties keep registration order.
    fn order(&self) -> i32 {
        i32::MAX
    }

    fn fetch_uri<'a>(&'a self, ctx: &'a LoadSession, url: &'a str) -> Hook<'a, Vec<u8>> {
        defer()
    }

    fn load_buffer<'a>(&'a self, ctx: &'a LoadSession, index: usize) -> Hook<'a, Arc<Vec<u8>>> {
        defer()
    }

    fn load_buffer_view<'a>(&'a self, ctx: &'a LoadSession, index: usize) -> Hook<'a, ByteWindow> {
        defer()
    }

    fn load_accessor<'a>(&'a self, ctx: &'a LoadSession, index: usize) -> Hook<'a, Arc<AccessorData>> {
        defer()
    }

    fn load_texture<'a>(
        &'a self,
        ctx: &'a LoadSession,
        index: usize,
        srgb: bool,
    ) -> Hook<'a, Arc<EngineTexture>> {
        defer()
    }

    fn load_material<'a>(
        &'a self,
        ctx: &'a LoadSession,
        index: usize,
        topology: crate::engine::Topology,
    ) -> Hook<'a, Arc<Material>> {
        defer()
    }

    fn load_skin<'a>(&'a self, ctx: &'a LoadSession, index: usize) -> Hook<'a, Arc<Skeleton>> {
        defer()
    }

    fn load_primitive<'a>(
        &'a self,
        ctx: &'a LoadSession,
        mesh: usize,
        primitive: usize,
    ) -> Hook<'a, Arc<GeometryMesh>> {
        defer()
    }

    fn load_vertex_data<'a>(
        &'a self,
        ctx: &'a LoadSession,
        mesh: usize,
        primitive: usize,
    ) -> Hook<'a, Arc<Geometry>> {
        defer()
    }

    fn load_node<'a>(&'a self, ctx: &'a LoadSession, index: usize) -> Hook<'a, Arc<TransformNode>> {
        defer()
    }

    fn load_camera<'a>(&'a self, ctx: &'a LoadSession, index: usize) -> Hook<'a, Arc<Camera>> {
        defer()
    }

    fn load_animation<'a>(
        &'a self,
        ctx: &'a LoadSession,
        index: usize,
    ) -> Hook<'a, Arc<AnimationGroup>> {
        defer()
    }

    fn load_scene<'a>(
        &'a self,
        ctx: &'a LoadSession,
        index: usize,
    ) -> Hook<'a, Vec<Arc<TransformNode>>> {
        defer()
    }

    /// A future the session awaits between READY and COMPLETE, for background
    /// work the extension schedules during loading.
    fn completion<'a>(&'a self, ctx: &'a LoadSession) -> Option<BoxFuture<'a, Result<(), LoaderError>>> {
        None
    }

    fn dispose(&self) {}
}

/// Key of an active dispatch: (sorted extension slot, stage, entity).
pub(crate) type GuardKey = (usize, Stage, u64);

/// RAII reentrancy marker, released on every exit path including errors.
pub(crate) struct StageGuard<'a> {
    guards: &'a DashSet<GuardKey>,
    key: GuardKey,
}

impl<'a> StageGuard<'a> {
    pub(crate) fn acquire(guards: &'a DashSet<GuardKey>, key: GuardKey) -> Option<Self> {
        if !guards.insert(key) {
            return None;
        }
        Some(Self { guards, key })
    }
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.guards.remove(&self.key);
    }
}

pub type ExtensionFactory = Box<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Explicit, session-independent registry of extension factories. Multiple
/// concurrent sessions sharing one registry do not interfere; each gets its
/// own instances.
pub struct ExtensionRegistry {
    entries: Mutex<Vec<(String, ExtensionFactory)>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// A registry preloaded with the extensions this crate ships.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(lights::EXTENSION_NAME, Box::new(|| Box::new(lights::PunctualLights::new())));
        registry.register(unlit::EXTENSION_NAME, Box::new(|| Box::new(unlit::UnlitMaterials {})));
        registry
    }

    pub fn register(&self, name: &str, factory: ExtensionFactory) {
        let mut entries = self.entries.lock().expect("registry lock");
        if let Some(existing) = entries.iter_mut().find(|(n, _)| n == name) {
            warn!("Replacing already registered extension '{}'", name);
            existing.1 = factory;
        } else {
            entries.push((name.to_owned(), factory));
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.lock().expect("registry lock");
        let before = entries.len();
        entries.retain(|(n, _)| n != name);
        entries.len() != before
    }

    /// Instantiates one extension per factory, in registration order, then
    /// stable-sorts by ascending order. The caller owns the instances.
    pub(crate) fn instantiate(&self) -> Vec<Box<dyn Extension>> {
        let entries = self.entries.lock().expect("registry lock");
        let mut instances: Vec<Box<dyn Extension>> = entries.iter().map(|(_, f)| f()).collect();
        instances.sort_by_key(|ext| ext.order());
        instances
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use dashmap::DashSet;

    use super::{Extension, ExtensionRegistry, Stage, StageGuard};

    struct Dummy {
        name: &'static str,
        order: i32,
    }

    impl Extension for Dummy {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }
    }

    #[test]
    fn instantiation_sorts_by_order_keeping_registration_order_on_ties() {
        let registry = ExtensionRegistry::new();
        registry.register("late", Box::new(|| Box::new(Dummy { name: "late", order: 20 })));
        registry.register("default_a", Box::new(|| Box::new(Dummy { name: "default_a", order: i32::MAX })));
        registry.register("early", Box::new(|| Box::new(Dummy { name: "early", order: 10 })));
        registry.register("default_b", Box::new(|| Box::new(Dummy { name: "default_b", order: i32::MAX })));

        let names: Vec<_> = registry.instantiate().iter().map(|e| e.name().to_owned()).collect();
        assert_eq!(names, vec!["early", "late", "default_a", "default_b"]);
    }

    #[test]
    fn unregister_removes_the_factory() {
        let registry = ExtensionRegistry::new();
        registry.register("gone", Box::new(|| Box::new(Dummy { name: "gone", order: 0 })));
        assert!(registry.unregister("gone"));
        assert!(!registry.unregister("gone"));
        assert!(registry.instantiate().is_empty());
    }

    #[test]
    fn stage_guard_is_released_on_drop() {
        let guards = DashSet::new();
        let key = (0, Stage::Material, 7);
        {
            let _guard = StageGuard::acquire(&guards, key).expect("first acquire");
            assert!(StageGuard::acquire(&guards, key).is_none());
        }
        assert!(StageGuard::acquire(&guards, key).is_some());
    }
}
