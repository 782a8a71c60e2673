//! Tiles, the arena that owns them, and the content load-state machine.
//!
//! A tile's content moves through [`TileLoadState`] as it loads. The main
//! thread drives every transition except one: `ContentLoaded` is published
//! by a worker task through the tile's [`LoadSlot`], a small `Arc`-shared
//! handshake of atomics plus a payload mutex. Workers never touch the tile
//! or the arena; a worker that finishes after a cancel or teardown loses a
//! `compare_exchange` race and drops its own payload.

use std::any::Any;
use std::sync::atomic::{AtomicI8, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use glam::DMat4;

use crate::cache::LruLinks;
use crate::content::{ContentRegistry, ExternalTilesetContent, TileContent};
use crate::externals::{
    AssetRequest, AssetResponse, LoadContext, PrepareRendererResources, TilesetExternals,
};
use crate::selection::TileSelectionState;
use crate::volumes::BoundingVolume;

/// The lifecycle of a tile's content.
///
/// `Failed` and `Destroying` are absorbing; everything else moves strictly
/// forward, `Unloaded → ContentLoading → ContentLoaded → Done`, until cache
/// eviction returns the tile to `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum TileLoadState {
    /// The tile is being torn down while a load is still in flight.
    Destroying = -2,
    /// Loading failed; the tile is not retried.
    Failed = -1,
    /// No content is loaded or in flight.
    Unloaded = 0,
    /// The network request or the worker task is in flight.
    ContentLoading = 1,
    /// Content is decoded and waiting for main-thread installation.
    ContentLoaded = 2,
    /// Content is installed and renderer resources are prepared.
    Done = 3,
}

impl TileLoadState {
    fn from_raw(value: i8) -> Self {
        match value {
            -2 => Self::Destroying,
            -1 => Self::Failed,
            1 => Self::ContentLoading,
            2 => Self::ContentLoaded,
            3 => Self::Done,
            _ => Self::Unloaded,
        }
    }
}

/// How a tile's children relate to it during refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refine {
    /// Children add detail on top of this tile; both levels render together.
    Add,
    /// Children replace this tile entirely.
    #[default]
    Replace,
}

/// What the load slot holds, written before `ContentLoaded` is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ContentKind {
    None = 0,
    Renderable = 1,
    ExternalTileset = 2,
}

impl ContentKind {
    fn from_raw(value: u8) -> Self {
        match value {
            1 => Self::Renderable,
            2 => Self::ExternalTileset,
            _ => Self::None,
        }
    }
}

/// What a worker task deposits for main-thread installation.
struct LoadPayload {
    content: Box<dyn TileContent>,
    load_thread_result: Option<Box<dyn Any + Send>>,
}

/// The cross-thread handshake for one tile's load.
///
/// The atomic state is the only synchronization between the main thread and
/// the worker: loads are `Acquire`, stores `Release`, and contested
/// transitions go through `compare_exchange`. The payload and content kind
/// are written before `ContentLoaded` is published, so any thread that
/// observes the state also observes them.
struct LoadSlot {
    state: AtomicI8,
    content_kind: AtomicU8,
    payload: Mutex<Option<LoadPayload>>,
}

impl LoadSlot {
    fn new() -> Self {
        Self {
            state: AtomicI8::new(TileLoadState::Unloaded as i8),
            content_kind: AtomicU8::new(ContentKind::None as u8),
            payload: Mutex::new(None),
        }
    }

    fn load_state(&self) -> TileLoadState {
        TileLoadState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn store_state(&self, state: TileLoadState) {
        self.state.store(state as i8, Ordering::Release);
    }

    /// Attempts `from → to`, failing when another thread moved first.
    fn transition(&self, from: TileLoadState, to: TileLoadState) -> bool {
        self.state
            .compare_exchange(from as i8, to as i8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::from_raw(self.content_kind.load(Ordering::Relaxed))
    }

    fn is_renderable(&self) -> bool {
        self.load_state() >= TileLoadState::ContentLoaded
            && self.content_kind() == ContentKind::Renderable
    }

    fn deposit(&self, payload: LoadPayload, kind: ContentKind) {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload);
        self.content_kind.store(kind as u8, Ordering::Relaxed);
    }

    fn take_payload(&self) -> Option<LoadPayload> {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Returns the slot to its pristine `Unloaded` shape.
    fn reset(&self) {
        self.content_kind
            .store(ContentKind::None as u8, Ordering::Relaxed);
        self.store_state(TileLoadState::Unloaded);
    }
}

/// A generation-checked handle to a tile in a [`TileArena`].
///
/// Keys go stale when the tree is rebuilt; a stale key resolves to `None`
/// instead of aliasing a new tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// An external tileset manifest ready to be spliced in under its tile.
pub(crate) struct ExternalSubtree {
    pub(crate) document: strata_json::TilesetDocument,
    pub(crate) base_url: String,
}

/// A node in the tile tree.
///
/// Structure (parent, children, volumes, transform) is fixed at build time;
/// content and renderer resources come and go as the tile loads and unloads.
pub struct Tile {
    key: TileKey,
    parent: Option<TileKey>,
    children: Vec<TileKey>,
    transform: DMat4,
    bounding_volume: BoundingVolume,
    viewer_request_volume: Option<BoundingVolume>,
    content_bounding_volume: Option<BoundingVolume>,
    geometric_error: f64,
    refine: Refine,
    content_uri: Option<String>,
    slot: Arc<LoadSlot>,
    request: Option<Box<dyn AssetRequest>>,
    content: Option<Box<dyn TileContent>>,
    renderer_resources: Option<Box<dyn Any + Send>>,
    renderer_resources_prepared: bool,
    last_selection_state: TileSelectionState,
    /// Frame number when this tile was last in the render list,
    /// `u32::MAX` for never.
    pub(crate) rendered_in_frame: u32,
    pub(crate) lru: LruLinks,
}

impl Tile {
    pub(crate) fn new(key: TileKey, parent: Option<TileKey>) -> Self {
        Self {
            key,
            parent,
            children: Vec::new(),
            transform: DMat4::IDENTITY,
            bounding_volume: BoundingVolume::Sphere(crate::volumes::BoundingSphere::new(
                glam::DVec3::ZERO,
                0.0,
            )),
            viewer_request_volume: None,
            content_bounding_volume: None,
            geometric_error: 0.0,
            refine: Refine::default(),
            content_uri: None,
            slot: Arc::new(LoadSlot::new()),
            request: None,
            content: None,
            renderer_resources: None,
            renderer_resources_prepared: false,
            last_selection_state: TileSelectionState::default(),
            rendered_in_frame: u32::MAX,
            lru: LruLinks::default(),
        }
    }

    /// This tile's handle in the owning arena.
    #[must_use]
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// The parent tile, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<TileKey> {
        self.parent
    }

    /// The child tiles, in manifest order.
    #[must_use]
    pub fn children(&self) -> &[TileKey] {
        &self.children
    }

    /// The world transform, parent transforms already composed in.
    #[must_use]
    pub fn transform(&self) -> DMat4 {
        self.transform
    }

    /// The tile's bounding volume, in world space.
    #[must_use]
    pub fn bounding_volume(&self) -> &BoundingVolume {
        &self.bounding_volume
    }

    /// The volume the viewer must be inside for this tile to be shown.
    #[must_use]
    pub fn viewer_request_volume(&self) -> Option<&BoundingVolume> {
        self.viewer_request_volume.as_ref()
    }

    /// A volume enclosing just the tile's content, when the manifest gave
    /// one.
    #[must_use]
    pub fn content_bounding_volume(&self) -> Option<&BoundingVolume> {
        self.content_bounding_volume.as_ref()
    }

    /// The error, in meters, of rendering this tile instead of its children.
    #[must_use]
    pub fn geometric_error(&self) -> f64 {
        self.geometric_error
    }

    /// How this tile's children refine it.
    #[must_use]
    pub fn refine(&self) -> Refine {
        self.refine
    }

    /// The resolved content URL, `None` when there is nothing to fetch.
    #[must_use]
    pub fn content_uri(&self) -> Option<&str> {
        self.content_uri.as_deref()
    }

    /// The current load state.
    #[must_use]
    pub fn load_state(&self) -> TileLoadState {
        self.slot.load_state()
    }

    /// True when the tile has renderable content ready to draw. External
    /// tileset content and tiles without content are never renderable.
    #[must_use]
    pub fn is_renderable(&self) -> bool {
        self.slot.is_renderable()
    }

    /// The installed content, present from `Done` until the tile unloads.
    #[must_use]
    pub fn content(&self) -> Option<&dyn TileContent> {
        self.content.as_deref()
    }

    /// The host's renderer resources for this tile.
    #[must_use]
    pub fn renderer_resources(&self) -> Option<&(dyn Any + Send)> {
        self.renderer_resources.as_deref()
    }

    /// What the traversal decided about this tile, tagged with the frame
    /// number the decision was made on.
    #[must_use]
    pub fn last_selection_state(&self) -> TileSelectionState {
        self.last_selection_state
    }

    pub(crate) fn last_selection_state_mut(&mut self) -> &mut TileSelectionState {
        &mut self.last_selection_state
    }

    pub(crate) fn set_last_selection_state(&mut self, state: TileSelectionState) {
        self.last_selection_state = state;
    }

    pub(crate) fn set_transform(&mut self, transform: DMat4) {
        self.transform = transform;
    }

    pub(crate) fn set_bounding_volume(&mut self, volume: BoundingVolume) {
        self.bounding_volume = volume;
    }

    pub(crate) fn set_viewer_request_volume(&mut self, volume: BoundingVolume) {
        self.viewer_request_volume = Some(volume);
    }

    pub(crate) fn set_content_bounding_volume(&mut self, volume: BoundingVolume) {
        self.content_bounding_volume = Some(volume);
    }

    pub(crate) fn set_geometric_error(&mut self, error: f64) {
        self.geometric_error = error;
    }

    pub(crate) fn set_refine(&mut self, refine: Refine) {
        self.refine = refine;
    }

    pub(crate) fn set_content_uri(&mut self, uri: String) {
        self.content_uri = Some(uri);
    }

    pub(crate) fn set_children(&mut self, children: Vec<TileKey>) {
        self.children = children;
    }

    /// Marks the renderer resources as needing no preparation, for tiles
    /// whose content entry carries no URI.
    pub(crate) fn mark_renderer_resources_prepared(&mut self) {
        self.renderer_resources_prepared = true;
    }

    /// Begins loading this tile's content. No-op unless `Unloaded`.
    ///
    /// The caller has already counted this load in `loads_in_progress`; the
    /// count is released here when there is nothing to fetch.
    pub(crate) fn load_content(
        &mut self,
        externals: &TilesetExternals,
        loads_in_progress: &AtomicU32,
    ) {
        if self.load_state() != TileLoadState::Unloaded {
            return;
        }

        let Some(url) = self.content_uri.clone() else {
            // Nothing to fetch. The tile still passes through ContentLoaded
            // so update() can run main-thread preparation and reach Done.
            self.slot.store_state(TileLoadState::ContentLoaded);
            loads_in_progress.fetch_sub(1, Ordering::Relaxed);
            return;
        };

        self.slot.store_state(TileLoadState::ContentLoading);
        tracing::debug!(url, "requesting tile content");
        self.request = Some(externals.asset_accessor.request_asset(&url));
    }

    /// Hands a completed content request to [`Self::process_content_response`].
    /// No-op while the request is still pending.
    pub(crate) fn pump_content_request(
        &mut self,
        externals: &TilesetExternals,
        loads_in_progress: &Arc<AtomicU32>,
    ) {
        let Some(request) = &self.request else {
            return;
        };
        let Some(response) = request.response().cloned() else {
            return;
        };
        self.request = None;
        self.process_content_response(Some(response), externals, loads_in_progress);
    }

    /// Reacts to the completion of this tile's content request, dispatching
    /// a worker task to decode successful payloads.
    pub(crate) fn process_content_response(
        &mut self,
        response: Option<AssetResponse>,
        externals: &TilesetExternals,
        loads_in_progress: &Arc<AtomicU32>,
    ) {
        if self.load_state() == TileLoadState::Destroying {
            self.slot.store_state(TileLoadState::Failed);
            loads_in_progress.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        if self.load_state() > TileLoadState::ContentLoading {
            // Duplicate response; the content already made it through.
            return;
        }

        let url = self.content_uri.clone().unwrap_or_default();

        let Some(response) = response else {
            tracing::warn!(url, "tile content request completed without a response");
            self.slot.store_state(TileLoadState::Failed);
            loads_in_progress.fetch_sub(1, Ordering::Relaxed);
            return;
        };

        if !response.is_success() {
            tracing::warn!(url, status = response.status, "tile content request failed");
            self.slot.store_state(TileLoadState::Failed);
            loads_in_progress.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        let slot = Arc::clone(&self.slot);
        let registry = Arc::clone(&externals.content_registry);
        let preparer = externals.prepare_renderer_resources.clone();
        let loads = Arc::clone(loads_in_progress);
        let context = LoadContext {
            url,
            transform: self.transform,
        };
        let data = response.data;

        externals.task_processor.start_task(Box::new(move || {
            load_task(
                &slot,
                &registry,
                preparer.as_deref(),
                &context,
                &data,
                &loads,
            );
        }));
    }

    /// Advances a `ContentLoaded` tile to `Done`: installs the deposited
    /// payload, runs main-thread renderer preparation, and hands back any
    /// external subtree for the tileset to splice in.
    pub(crate) fn update(&mut self, externals: &TilesetExternals) -> Option<ExternalSubtree> {
        if self.load_state() != TileLoadState::ContentLoaded {
            return None;
        }

        if let Some(payload) = self.slot.take_payload() {
            self.content = Some(payload.content);
            self.renderer_resources = payload.load_thread_result;
        }

        if !self.renderer_resources_prepared {
            if let Some(preparer) = &externals.prepare_renderer_resources {
                let load_result = self.renderer_resources.take();
                self.renderer_resources = preparer.prepare_in_main_thread(self, load_result);
            }
        }

        self.slot.store_state(TileLoadState::Done);

        self.content
            .as_ref()
            .and_then(|content| content.as_any().downcast_ref::<ExternalTilesetContent>())
            .map(|external| ExternalSubtree {
                document: external.document().clone(),
                base_url: external.base_url().to_owned(),
            })
    }

    /// Unloads this tile's content so the cache can reclaim it.
    ///
    /// Returns `false` while an async operation is in flight, and for
    /// external tileset content whose children are wired into the tree.
    pub(crate) fn unload_content(&mut self, externals: &TilesetExternals) -> bool {
        if self.load_state() == TileLoadState::ContentLoading {
            return false;
        }
        if self
            .content
            .as_ref()
            .is_some_and(|content| content.kind() == ExternalTilesetContent::KIND)
        {
            return false;
        }

        if let Some(payload) = self.slot.take_payload() {
            // Decoded content that was never installed; free its load-thread
            // work and drop it.
            if let Some(preparer) = &externals.prepare_renderer_resources {
                preparer.free(self, payload.load_thread_result, None);
            }
        } else if let Some(preparer) = &externals.prepare_renderer_resources {
            let resources = self.renderer_resources.take();
            if self.load_state() == TileLoadState::Done {
                preparer.free(self, None, resources);
            } else {
                preparer.free(self, resources, None);
            }
        }

        self.renderer_resources = None;
        self.content = None;
        self.slot.reset();
        true
    }

    /// Cancels an in-flight load, returning the tile to `Unloaded`.
    ///
    /// The in-flight count is released only when the network phase was
    /// still pending; a running worker task releases it itself.
    pub(crate) fn cancel_load_content(&mut self, loads_in_progress: &AtomicU32) {
        let network_phase = self.request.is_some();
        if let Some(request) = self.request.take() {
            request.cancel();
        }

        if self
            .slot
            .transition(TileLoadState::ContentLoading, TileLoadState::Unloaded)
            && network_phase
        {
            loads_in_progress.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Completes main-thread renderer preparation for hosts whose
    /// preparation is itself asynchronous.
    pub fn finish_prepare_renderer_resources(&mut self, resources: Option<Box<dyn Any + Send>>) {
        self.renderer_resources = resources;
        self.slot.store_state(TileLoadState::Done);
    }

    /// Readies the tile for teardown: cancels any request and leaves a
    /// marker for in-flight worker tasks to abandon their work.
    pub(crate) fn prepare_to_destroy(&mut self, loads_in_progress: &AtomicU32) {
        let network_phase = self.request.is_some();
        if let Some(request) = self.request.take() {
            request.cancel();
        }

        if self
            .slot
            .transition(TileLoadState::ContentLoading, TileLoadState::Destroying)
            && network_phase
        {
            loads_in_progress.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// The worker half of a content load. Runs on a task-processor thread and
/// talks back only through the slot and the counter.
fn load_task(
    slot: &LoadSlot,
    registry: &ContentRegistry,
    preparer: Option<&dyn PrepareRendererResources>,
    context: &LoadContext,
    data: &[u8],
    loads_in_progress: &AtomicU32,
) {
    if slot.load_state() == TileLoadState::Destroying {
        slot.store_state(TileLoadState::Failed);
        loads_in_progress.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let content = match registry.create(&context.url, data) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(url = context.url, error = %e, "failed to create tile content");
            slot.transition(TileLoadState::ContentLoading, TileLoadState::Failed);
            loads_in_progress.fetch_sub(1, Ordering::Relaxed);
            return;
        }
    };

    tracing::debug!(url = context.url, kind = content.kind(), "tile content loaded");

    let kind = if content.as_any().is::<ExternalTilesetContent>() {
        ContentKind::ExternalTileset
    } else {
        ContentKind::Renderable
    };

    let load_thread_result =
        preparer.and_then(|preparer| preparer.prepare_in_load_thread(content.as_ref(), context));

    slot.deposit(
        LoadPayload {
            content,
            load_thread_result,
        },
        kind,
    );
    loads_in_progress.fetch_sub(1, Ordering::Relaxed);

    if !slot.transition(TileLoadState::ContentLoading, TileLoadState::ContentLoaded) {
        // A cancel or teardown won the race; reclaim the payload so its
        // resources drop here instead of lingering in the slot.
        drop(slot.take_payload());
    }
}

/// Owns every tile in a tileset.
///
/// Tiles are addressed by [`TileKey`]. The generation is arena-wide and
/// bumps when the tree is rebuilt, so handles into a torn-down tree resolve
/// to `None` instead of aliasing whatever replaced them.
pub struct TileArena {
    tiles: Vec<Tile>,
    generation: u32,
}

impl TileArena {
    pub(crate) fn new() -> Self {
        Self {
            tiles: Vec::new(),
            generation: 0,
        }
    }

    /// The number of tiles in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// True when the arena holds no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Resolves a key, returning `None` for keys from a torn-down tree.
    #[must_use]
    pub fn get(&self, key: TileKey) -> Option<&Tile> {
        if key.generation != self.generation {
            return None;
        }
        self.tiles.get(key.index as usize)
    }

    pub(crate) fn get_mut(&mut self, key: TileKey) -> Option<&mut Tile> {
        if key.generation != self.generation {
            return None;
        }
        self.tiles.get_mut(key.index as usize)
    }

    pub(crate) fn by_index(&self, index: u32) -> &Tile {
        &self.tiles[index as usize]
    }

    pub(crate) fn by_index_mut(&mut self, index: u32) -> &mut Tile {
        &mut self.tiles[index as usize]
    }

    /// Adds a tile built by `f`, which receives the tile's key.
    pub(crate) fn insert_with(&mut self, f: impl FnOnce(TileKey) -> Tile) -> TileKey {
        // Tile counts are bounded by manifest size, far below u32::MAX.
        #[allow(clippy::cast_possible_truncation)]
        let index = self.tiles.len() as u32;
        let key = TileKey {
            index,
            generation: self.generation,
        };
        let tile = f(key);
        self.tiles.push(tile);
        key
    }

    /// Readies every tile for teardown without touching worker tasks.
    pub(crate) fn prepare_destroy_all(&mut self, loads_in_progress: &AtomicU32) {
        for tile in &mut self.tiles {
            tile.prepare_to_destroy(loads_in_progress);
        }
    }

    /// Tears the tree down and bumps the generation, invalidating every
    /// outstanding key.
    pub(crate) fn clear(&mut self, loads_in_progress: &AtomicU32) {
        self.prepare_destroy_all(loads_in_progress);
        self.tiles.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}
