//! The tileset: tree ownership, per-frame tile selection, load scheduling,
//! and cache eviction.
//!
//! [`Tileset::update_view`] is the heart of the engine. Each call advances
//! the frame number, installs content that finished loading, walks the tree
//! depth-first against the camera, and hands back exactly what changed:
//! which tiles to draw, which are new, and which to stop drawing. Selection
//! favors stability over eagerness: a tile keeps rendering until whatever
//! replaces it is actually ready, so detail streams in without holes or
//! flicker.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use strata_json::TilesetDocument;

use crate::builder;
use crate::cache::LruList;
use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::externals::{AssetRequest, TilesetExternals};
use crate::selection::{SelectionResult, TileSelectionState};
use crate::tile::{Refine, Tile, TileArena, TileKey, TileLoadState};

/// Tuning knobs for selection, loading, and caching.
#[derive(Debug, Clone)]
pub struct TilesetOptions {
    /// The largest screen-space error, in pixels, the scene tolerates
    /// before refining a tile into its children.
    pub maximum_screen_space_error: f64,
    /// How many tile loads may be in flight at once, across the network
    /// and worker phases.
    pub maximum_simultaneous_tile_loads: u32,
    /// Load the ancestors of rendered tiles at low priority, so zooming
    /// out has something to fall back on.
    pub preload_ancestors: bool,
    /// Load culled tiles at low priority, so panning reveals them quickly.
    pub preload_siblings: bool,
    /// When more descendants than this are still loading under a tile that
    /// was not on screen last frame, their queued loads are abandoned and
    /// the tile itself loads instead.
    pub loading_descendant_limit: u32,
    /// Never refine a tile while any of its children is still unable to
    /// render; the tile keeps rendering until the whole next level is in.
    pub forbid_holes: bool,
    /// How many tiles may keep content in memory. Eviction frees the least
    /// recently visited tiles beyond this, never tiles visited this frame.
    pub maximum_cached_tiles: usize,
    /// Keep traversing culled tiles against
    /// [`culled_screen_space_error`](Self::culled_screen_space_error),
    /// preloading the level of detail an eventual pan would need.
    pub enforce_culled_screen_space_error: bool,
    /// The screen-space error target used for culled tiles when
    /// [`enforce_culled_screen_space_error`](Self::enforce_culled_screen_space_error)
    /// is on.
    pub culled_screen_space_error: f64,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            maximum_simultaneous_tile_loads: 10,
            preload_ancestors: true,
            preload_siblings: true,
            loading_descendant_limit: 20,
            forbid_holes: false,
            maximum_cached_tiles: 400,
            enforce_culled_screen_space_error: false,
            culled_screen_space_error: 64.0,
        }
    }
}

/// What changed in the scene after a call to [`Tileset::update_view`].
///
/// The keys are valid until the next call.
#[derive(Debug, Default, Clone)]
pub struct ViewUpdateResult {
    /// Every tile the host should draw this frame.
    pub tiles_to_render_this_frame: Vec<TileKey>,
    /// The subset of the render list that was not drawn last frame.
    pub tiles_newly_rendered_this_frame: Vec<TileKey>,
    /// Tiles drawn last frame that should no longer be drawn.
    pub tiles_to_no_longer_render_this_frame: Vec<TileKey>,
    /// Tile loads currently in flight, counting both the network and the
    /// worker phase.
    pub tiles_loading: u32,
}

/// What a visited subtree reported back to its parent.
#[derive(Debug, Clone, Copy)]
struct TraversalDetails {
    /// Every selected tile in the subtree is ready to draw.
    all_are_renderable: bool,
    /// Something in the subtree was actually drawn last frame.
    any_were_rendered_last_frame: bool,
    /// How many selected tiles are still waiting on content.
    not_yet_renderable_count: u32,
}

impl Default for TraversalDetails {
    fn default() -> Self {
        Self {
            all_are_renderable: true,
            any_were_rendered_last_frame: false,
            not_yet_renderable_count: 0,
        }
    }
}

/// A streaming 3D Tiles tileset.
///
/// Owns the tile tree and drives loading against the external interfaces it
/// was constructed with. All methods are main-thread only; the worker side
/// of loading talks back through per-tile atomics.
pub struct Tileset {
    externals: TilesetExternals,
    options: TilesetOptions,
    url: String,
    manifest_request: Option<Box<dyn AssetRequest>>,
    manifest_error: Option<Error>,
    tiles: TileArena,
    root: Option<TileKey>,
    lru: LruList,
    loads_in_progress: Arc<AtomicU32>,
    previous_frame: u32,
    current_frame: u32,
    result: ViewUpdateResult,
    newly_rendered_flags: Vec<bool>,
    high_priority_queue: Vec<TileKey>,
    medium_priority_queue: Vec<TileKey>,
    low_priority_queue: Vec<TileKey>,
}

impl Tileset {
    /// Creates a tileset that fetches its manifest from `url`.
    ///
    /// The request is issued immediately and resolved inside
    /// [`update_view`](Self::update_view); until it lands, updates return
    /// empty results. A manifest that cannot be fetched or parsed is
    /// reported through [`manifest_error`](Self::manifest_error) and leaves
    /// the tileset permanently empty.
    #[must_use]
    pub fn new(externals: TilesetExternals, url: &str, options: TilesetOptions) -> Self {
        tracing::debug!(url, "requesting tileset manifest");
        let manifest_request = Some(externals.asset_accessor.request_asset(url));
        Self {
            externals,
            options,
            url: url.to_owned(),
            manifest_request,
            manifest_error: None,
            tiles: TileArena::new(),
            root: None,
            lru: LruList::new(),
            loads_in_progress: Arc::new(AtomicU32::new(1)),
            previous_frame: 0,
            current_frame: 0,
            result: ViewUpdateResult::default(),
            newly_rendered_flags: Vec::new(),
            high_priority_queue: Vec::new(),
            medium_priority_queue: Vec::new(),
            low_priority_queue: Vec::new(),
        }
    }

    /// Creates a tileset from an already parsed manifest, building the tree
    /// synchronously. Content URIs resolve against `base_url`.
    pub fn from_document(
        externals: TilesetExternals,
        document: &TilesetDocument,
        base_url: &str,
        options: TilesetOptions,
    ) -> Result<Self> {
        let mut tiles = TileArena::new();
        let root = builder::build_tile_tree(&mut tiles, document, base_url)?;
        Ok(Self {
            externals,
            options,
            url: base_url.to_owned(),
            manifest_request: None,
            manifest_error: None,
            tiles,
            root: Some(root),
            lru: LruList::new(),
            loads_in_progress: Arc::new(AtomicU32::new(0)),
            previous_frame: 0,
            current_frame: 0,
            result: ViewUpdateResult::default(),
            newly_rendered_flags: Vec::new(),
            high_priority_queue: Vec::new(),
            medium_priority_queue: Vec::new(),
            low_priority_queue: Vec::new(),
        })
    }

    /// The manifest URL this tileset was created from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The options the tileset was created with.
    #[must_use]
    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    /// The root tile, `None` until the manifest has loaded.
    #[must_use]
    pub fn root(&self) -> Option<TileKey> {
        self.root
    }

    /// Resolves a tile key.
    #[must_use]
    pub fn tile(&self, key: TileKey) -> Option<&Tile> {
        self.tiles.get(key)
    }

    /// The arena holding every tile in the tree.
    #[must_use]
    pub fn tiles(&self) -> &TileArena {
        &self.tiles
    }

    /// Why the manifest could not be loaded, if it could not.
    #[must_use]
    pub fn manifest_error(&self) -> Option<&Error> {
        self.manifest_error.as_ref()
    }

    /// Completes asynchronous main-thread preparation for a tile, for hosts
    /// whose [`PrepareRendererResources::prepare_in_main_thread`] defers
    /// work instead of finishing it inline.
    ///
    /// [`PrepareRendererResources::prepare_in_main_thread`]:
    /// crate::externals::PrepareRendererResources::prepare_in_main_thread
    pub fn finish_prepare_renderer_resources(
        &mut self,
        key: TileKey,
        resources: Option<Box<dyn Any + Send>>,
    ) {
        if let Some(tile) = self.tiles.get_mut(key) {
            tile.finish_prepare_renderer_resources(resources);
        }
    }

    /// Selects tiles for the given view and schedules the loads the view
    /// needs, returning what changed since the previous frame.
    pub fn update_view(&mut self, camera: &Camera) -> &ViewUpdateResult {
        self.current_frame = self.previous_frame + 1;

        self.result.tiles_to_render_this_frame.clear();
        self.result.tiles_newly_rendered_this_frame.clear();
        self.result.tiles_to_no_longer_render_this_frame.clear();
        self.newly_rendered_flags.clear();
        self.high_priority_queue.clear();
        self.medium_priority_queue.clear();
        self.low_priority_queue.clear();

        self.pump_manifest_request();
        self.pump_tiles();

        let Some(root) = self.root else {
            self.previous_frame = self.current_frame;
            self.result.tiles_loading = self.loads_in_progress.load(Ordering::Relaxed);
            return &self.result;
        };

        self.visit_tile_if_visible(camera, root, false);

        self.unload_cached_tiles();
        self.process_load_queue();

        let newly: Vec<TileKey> = self
            .result
            .tiles_to_render_this_frame
            .iter()
            .zip(&self.newly_rendered_flags)
            .filter_map(|(&key, &newly)| newly.then_some(key))
            .collect();
        self.result.tiles_newly_rendered_this_frame = newly;

        self.previous_frame = self.current_frame;
        self.result.tiles_loading = self.loads_in_progress.load(Ordering::Relaxed);

        tracing::trace!(
            frame = self.current_frame,
            rendered = self.result.tiles_to_render_this_frame.len(),
            loading = self.result.tiles_loading,
            "view updated"
        );
        &self.result
    }

    fn pump_manifest_request(&mut self) {
        let Some(request) = &self.manifest_request else {
            return;
        };
        let Some(response) = request.response().cloned() else {
            return;
        };
        self.manifest_request = None;
        self.loads_in_progress.fetch_sub(1, Ordering::Relaxed);

        if !response.is_success() {
            let error = if response.status == 0 {
                Error::ManifestRequest {
                    url: self.url.clone(),
                    message: "the request completed without a response".to_owned(),
                }
            } else {
                Error::ManifestStatus {
                    url: self.url.clone(),
                    status: response.status,
                }
            };
            tracing::error!(url = %self.url, error = %error, "failed to fetch tileset manifest");
            self.manifest_error = Some(error);
            return;
        }

        let document = match TilesetDocument::from_slice(&response.data) {
            Ok(document) => document,
            Err(e) => {
                let error = Error::ManifestParse {
                    url: self.url.clone(),
                    source: e,
                };
                tracing::error!(url = %self.url, error = %error, "failed to parse tileset manifest");
                self.manifest_error = Some(error);
                return;
            }
        };

        match builder::build_tile_tree(&mut self.tiles, &document, &self.url) {
            Ok(root) => {
                tracing::debug!(url = %self.url, tiles = self.tiles.len(), "tileset manifest loaded");
                self.root = Some(root);
            }
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "tileset manifest is unusable");
                self.manifest_error = Some(e);
            }
        }
    }

    /// Hands completed requests off to workers and installs content that
    /// workers finished, splicing in any external tilesets along the way.
    fn pump_tiles(&mut self) {
        let externals = self.externals.clone();
        let mut index = 0;
        while (index as usize) < self.tiles.len() {
            let subtree = {
                let tile = self.tiles.by_index_mut(index);
                tile.pump_content_request(&externals, &self.loads_in_progress);
                tile.update(&externals)
            };
            if let Some(subtree) = subtree {
                let key = self.tiles.by_index(index).key();
                tracing::debug!(url = %subtree.base_url, "attaching external tileset");
                builder::attach_external_subtree(
                    &mut self.tiles,
                    key,
                    &subtree.document,
                    &subtree.base_url,
                );
            }
            index += 1;
        }
    }

    fn visit_tile_if_visible(
        &mut self,
        camera: &Camera,
        key: TileKey,
        ancestor_meets_sse: bool,
    ) -> TraversalDetails {
        self.lru.touch(&mut self.tiles, key.index);

        let visible = {
            let tile = self.tiles.by_index(key.index);
            let inside_request_volume = tile
                .viewer_request_volume()
                .is_none_or(|volume| volume.distance_squared_to(camera.position()) == 0.0);
            inside_request_volume && camera.is_bounding_volume_visible(tile.bounding_volume())
        };
        if visible {
            return self.visit_tile(camera, key, ancestor_meets_sse);
        }

        self.mark_tile_and_children_non_rendered(key);
        self.set_selection(key, SelectionResult::Culled);

        if self.options.enforce_culled_screen_space_error {
            self.visit_culled_tile(camera, key);
        } else if self.options.preload_siblings {
            Self::enqueue(&mut self.low_priority_queue, &self.tiles, key);
        }

        TraversalDetails::default()
    }

    fn visit_tile(
        &mut self,
        camera: &Camera,
        key: TileKey,
        mut ancestor_meets_sse: bool,
    ) -> TraversalDetails {
        let previous = self.previous_frame;

        let (children, bounding_volume, geometric_error, refine, last_state, was_rendered_last) = {
            let tile = self.tiles.by_index(key.index);
            (
                tile.children().to_vec(),
                *tile.bounding_volume(),
                tile.geometric_error(),
                tile.refine(),
                tile.last_selection_state(),
                tile.rendered_in_frame == previous,
            )
        };
        let ready = can_render(self.tiles.by_index(key.index));
        let settled = is_settled(self.tiles.by_index(key.index));

        // Leaves render at whatever detail they have.
        if children.is_empty() {
            self.select_rendered(key, ready);
            Self::enqueue(&mut self.medium_priority_queue, &self.tiles, key);
            return TraversalDetails {
                all_are_renderable: settled,
                any_were_rendered_last_frame: was_rendered_last,
                not_yet_renderable_count: u32::from(!settled),
            };
        }

        let distance = camera.distance_squared_to(&bounding_volume).sqrt();
        let sse = camera.screen_space_error(geometric_error, distance);
        let meets_sse = sse < self.options.maximum_screen_space_error;

        let mut waiting_for_children = false;
        if self.options.forbid_holes {
            for &child in &children {
                let child_tile = self.tiles.by_index(child.index);
                if child_tile.load_state() != TileLoadState::Failed && !is_settled(child_tile) {
                    waiting_for_children = true;
                    Self::enqueue(&mut self.medium_priority_queue, &self.tiles, child);
                }
            }
        }

        let mut queued_for_load = false;

        if meets_sse || ancestor_meets_sse || waiting_for_children {
            // This tile is the level of detail the view wants. Show it if
            // it was on screen last frame, is newly reached, or is ready;
            // otherwise keep showing the deeper detail from last frame
            // while this tile loads.
            let original_result = last_state.original_result(previous);
            let suitable = matches!(
                original_result,
                SelectionResult::Rendered | SelectionResult::Culled | SelectionResult::None
            ) || settled;

            if suitable {
                if meets_sse {
                    Self::enqueue(&mut self.medium_priority_queue, &self.tiles, key);
                }
                self.mark_children_non_rendered(key);
                self.select_rendered(key, ready);
                return TraversalDetails {
                    all_are_renderable: settled,
                    any_were_rendered_last_frame: was_rendered_last,
                    not_yet_renderable_count: u32::from(!settled),
                };
            }

            ancestor_meets_sse = true;
            if meets_sse {
                Self::enqueue(&mut self.high_priority_queue, &self.tiles, key);
                queued_for_load = true;
            }
        }

        // Refine into the children.
        let mut self_pushed = false;
        if refine == Refine::Add && ready {
            // Additive children draw on top of this tile, not instead of it.
            self.push_to_render_list(key);
            self_pushed = true;
        }

        let first_rendered_index = self.result.tiles_to_render_this_frame.len();
        let queue_lengths = (
            self.high_priority_queue.len(),
            self.medium_priority_queue.len(),
            self.low_priority_queue.len(),
        );

        let mut order: Vec<(f64, TileKey)> = children
            .iter()
            .map(|&child| {
                let volume = *self.tiles.by_index(child.index).bounding_volume();
                (camera.distance_squared_to(&volume), child)
            })
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.index.cmp(&b.1.index)));

        let mut details = TraversalDetails::default();
        for &(_, child) in &order {
            let child_details = self.visit_tile_if_visible(camera, child, ancestor_meets_sse);
            details.all_are_renderable &= child_details.all_are_renderable;
            details.any_were_rendered_last_frame |= child_details.any_were_rendered_last_frame;
            details.not_yet_renderable_count += child_details.not_yet_renderable_count;
        }

        if refine == Refine::Add {
            details.all_are_renderable &= settled;
            details.any_were_rendered_last_frame |= was_rendered_last;
            if !settled {
                details.not_yet_renderable_count += 1;
            }
        }

        if !details.all_are_renderable && !details.any_were_rendered_last_frame {
            // The next level is not presentable yet and none of it was on
            // screen; showing a partial set of children would flicker or
            // leave holes. Pull the subtree back out and show this tile.
            self.kick_rendered_descendants(key, first_rendered_index);
            self.set_selection(key, SelectionResult::Rendered);
            if !self_pushed && ready {
                self.push_to_render_list(key);
            }

            if details.not_yet_renderable_count > self.options.loading_descendant_limit
                && !was_rendered_last
            {
                // Too much of the subtree is pending to wait for it; load
                // this tile instead and let the descendants go.
                self.high_priority_queue.truncate(queue_lengths.0);
                self.medium_priority_queue.truncate(queue_lengths.1);
                self.low_priority_queue.truncate(queue_lengths.2);
                Self::enqueue(&mut self.medium_priority_queue, &self.tiles, key);
                queued_for_load = true;
                details.not_yet_renderable_count = u32::from(!settled);
            }

            details.all_are_renderable = settled;
            details.any_were_rendered_last_frame = was_rendered_last;
        } else {
            self.mark_tile_non_rendered(key);
            self.set_selection(key, SelectionResult::Refined);
        }

        if self.options.preload_ancestors && !queued_for_load {
            Self::enqueue(&mut self.low_priority_queue, &self.tiles, key);
        }

        details
    }

    /// Load-only traversal of a culled subtree, chasing the relaxed
    /// screen-space error target. Never selects anything for rendering.
    fn visit_culled_tile(&mut self, camera: &Camera, key: TileKey) {
        self.lru.touch(&mut self.tiles, key.index);

        let (children, bounding_volume, geometric_error) = {
            let tile = self.tiles.by_index(key.index);
            (
                tile.children().to_vec(),
                *tile.bounding_volume(),
                tile.geometric_error(),
            )
        };

        let distance = camera.distance_squared_to(&bounding_volume).sqrt();
        let sse = camera.screen_space_error(geometric_error, distance);
        if sse < self.options.culled_screen_space_error || children.is_empty() {
            Self::enqueue(&mut self.low_priority_queue, &self.tiles, key);
            return;
        }
        for &child in &children {
            self.visit_culled_tile(camera, child);
        }
    }

    fn set_selection(&mut self, key: TileKey, result: SelectionResult) {
        let state = TileSelectionState::new(self.current_frame, result);
        self.tiles
            .by_index_mut(key.index)
            .set_last_selection_state(state);
    }

    /// Marks the tile `Rendered` and, when it is actually drawable, puts it
    /// in the render list. A tile selected while its content is pending
    /// keeps the `Rendered` decision so next frame favors it, but never
    /// reaches the host's draw list.
    fn select_rendered(&mut self, key: TileKey, ready: bool) {
        self.set_selection(key, SelectionResult::Rendered);
        if ready {
            self.push_to_render_list(key);
        }
    }

    fn push_to_render_list(&mut self, key: TileKey) {
        let previous = self.previous_frame;
        let current = self.current_frame;
        let tile = self.tiles.by_index_mut(key.index);
        let newly = tile.rendered_in_frame != previous;
        tile.rendered_in_frame = current;
        self.result.tiles_to_render_this_frame.push(key);
        self.newly_rendered_flags.push(newly);
    }

    /// Removes descendants pushed during this tile's visit from the render
    /// list, marking them and the chains between them and this tile as
    /// kicked.
    fn kick_rendered_descendants(&mut self, key: TileKey, first_rendered_index: usize) {
        let current = self.current_frame;
        let kicked: Vec<TileKey> =
            self.result.tiles_to_render_this_frame[first_rendered_index..].to_vec();
        for &descendant in &kicked {
            let mut cursor = descendant;
            while cursor != key {
                let tile = self.tiles.by_index_mut(cursor.index);
                if tile.last_selection_state().was_kicked(current) {
                    break;
                }
                tile.last_selection_state_mut().kick();
                match tile.parent() {
                    Some(parent) => cursor = parent,
                    None => break,
                }
            }
            // Out of the list, so not rendered this frame after all.
            self.tiles.by_index_mut(descendant.index).rendered_in_frame = u32::MAX;
        }
        self.result
            .tiles_to_render_this_frame
            .truncate(first_rendered_index);
        self.newly_rendered_flags.truncate(first_rendered_index);
    }

    fn mark_tile_non_rendered(&mut self, key: TileKey) {
        let tile = self.tiles.by_index(key.index);
        if tile.rendered_in_frame == self.previous_frame {
            self.result.tiles_to_no_longer_render_this_frame.push(key);
        }
    }

    fn mark_children_non_rendered(&mut self, key: TileKey) {
        let tile = self.tiles.by_index(key.index);
        if tile.last_selection_state().result(self.previous_frame) == SelectionResult::Refined {
            let children = tile.children().to_vec();
            for child in children {
                self.mark_tile_and_children_non_rendered(child);
            }
        }
    }

    fn mark_tile_and_children_non_rendered(&mut self, key: TileKey) {
        self.mark_tile_non_rendered(key);
        self.mark_children_non_rendered(key);
    }

    fn enqueue(queue: &mut Vec<TileKey>, tiles: &TileArena, key: TileKey) {
        if tiles.by_index(key.index).load_state() == TileLoadState::Unloaded {
            queue.push(key);
        }
    }

    /// Evicts least recently visited content down to the cache limit.
    /// Tiles that refuse to unload stay in the list and the walk moves on.
    fn unload_cached_tiles(&mut self) {
        let maximum = self.options.maximum_cached_tiles;
        let root_index = self.root.map(|key| key.index);
        let externals = self.externals.clone();

        let mut evicted = 0_u32;
        let mut cursor = self.lru.head();
        while self.lru.len() > maximum {
            let Some(index) = cursor else {
                break;
            };
            if Some(index) == root_index {
                // Everything from the root onward was visited this frame.
                break;
            }
            cursor = self.lru.next_of(&self.tiles, index);
            if self.tiles.by_index_mut(index).unload_content(&externals) {
                self.lru.remove(&mut self.tiles, index);
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::trace!(evicted, cached = self.lru.len(), "evicted cached tile content");
        }
    }

    fn process_load_queue(&mut self) {
        let externals = self.externals.clone();
        let maximum = self.options.maximum_simultaneous_tile_loads;
        Self::process_queue(
            &mut self.tiles,
            &self.high_priority_queue,
            &externals,
            &self.loads_in_progress,
            maximum,
        );
        Self::process_queue(
            &mut self.tiles,
            &self.medium_priority_queue,
            &externals,
            &self.loads_in_progress,
            maximum,
        );
        Self::process_queue(
            &mut self.tiles,
            &self.low_priority_queue,
            &externals,
            &self.loads_in_progress,
            maximum,
        );
    }

    fn process_queue(
        tiles: &mut TileArena,
        queue: &[TileKey],
        externals: &TilesetExternals,
        loads_in_progress: &Arc<AtomicU32>,
        maximum: u32,
    ) {
        if loads_in_progress.load(Ordering::Relaxed) >= maximum {
            return;
        }
        for &key in queue {
            let Some(tile) = tiles.get_mut(key) else {
                continue;
            };
            if tile.load_state() == TileLoadState::Unloaded {
                loads_in_progress.fetch_add(1, Ordering::Relaxed);
                tile.load_content(externals, loads_in_progress);
                if loads_in_progress.load(Ordering::Relaxed) >= maximum {
                    return;
                }
            }
        }
    }
}

impl Drop for Tileset {
    fn drop(&mut self) {
        if let Some(request) = self.manifest_request.take() {
            request.cancel();
        }
        self.tiles.prepare_destroy_all(&self.loads_in_progress);
    }
}

/// Drawable right now: content installed and resources prepared.
fn can_render(tile: &Tile) -> bool {
    tile.load_state() == TileLoadState::Done && tile.is_renderable()
}

/// Will never become more drawable than it is now: renderable content,
/// content-free by design, or an external tileset whose subtree is wired
/// in.
fn is_settled(tile: &Tile) -> bool {
    if tile.load_state() != TileLoadState::Done {
        return false;
    }
    tile.is_renderable() || tile.content().is_none() || !tile.children().is_empty()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use glam::{DVec2, DVec3};
    use proptest::prelude::*;

    use super::*;
    use crate::test_support::{init_logging, response, stub_response, TestHarness};

    const BASE: &str = "https://tiles.test/tileset.json";

    /// Root sphere radius 100 at the origin with two child spheres at
    /// x = ±50. Geometric errors 64 and 16.
    fn two_level_manifest(refine: &str) -> TilesetDocument {
        let json = format!(
            r#"{{
                "root": {{
                    "boundingVolume": {{ "sphere": [0.0, 0.0, 0.0, 100.0] }},
                    "geometricError": 64.0,
                    "refine": "{refine}",
                    "content": {{ "uri": "root.stub" }},
                    "children": [
                        {{
                            "boundingVolume": {{ "sphere": [-50.0, 0.0, 0.0, 50.0] }},
                            "geometricError": 16.0,
                            "content": {{ "uri": "a.stub" }}
                        }},
                        {{
                            "boundingVolume": {{ "sphere": [50.0, 0.0, 0.0, 50.0] }},
                            "geometricError": 16.0,
                            "content": {{ "uri": "b.stub" }}
                        }}
                    ]
                }}
            }}"#
        );
        TilesetDocument::from_slice(json.as_bytes()).unwrap()
    }

    /// A camera on the +Z axis looking at the origin, with fields of view
    /// chosen so screen-space error is `geometric_error * 1000 / distance`.
    fn camera_at(distance: f64) -> Camera {
        let fov = 2.0 * 0.5_f64.atan();
        Camera::new(
            DVec3::new(0.0, 0.0, distance),
            DVec3::NEG_Z,
            DVec3::Y,
            DVec2::new(1000.0, 1000.0),
            fov,
            fov,
        )
    }

    /// Same position, looking away from everything.
    fn camera_facing_away(distance: f64) -> Camera {
        let fov = 2.0 * 0.5_f64.atan();
        Camera::new(
            DVec3::new(0.0, 0.0, distance),
            DVec3::Z,
            DVec3::Y,
            DVec2::new(1000.0, 1000.0),
            fov,
            fov,
        )
    }

    fn harness_with_content() -> TestHarness {
        let harness = TestHarness::manual();
        for name in ["root.stub", "a.stub", "b.stub"] {
            harness
                .accessor
                .respond(&format!("https://tiles.test/{name}"), stub_response(b"STUB"));
        }
        harness
    }

    struct FrameSnapshot {
        rendered: Vec<TileKey>,
        newly: Vec<TileKey>,
        no_longer: Vec<TileKey>,
        loading: u32,
    }

    /// Runs one frame and checks the result invariants: rendered tiles are
    /// `Done`, the no-longer list only names tiles rendered last frame, and
    /// the newly list is exactly the rendered tiles absent last frame.
    fn run_frame(
        tileset: &mut Tileset,
        camera: &Camera,
        previously_rendered: &[TileKey],
    ) -> FrameSnapshot {
        let result = tileset.update_view(camera);
        let snapshot = FrameSnapshot {
            rendered: result.tiles_to_render_this_frame.clone(),
            newly: result.tiles_newly_rendered_this_frame.clone(),
            no_longer: result.tiles_to_no_longer_render_this_frame.clone(),
            loading: result.tiles_loading,
        };

        let unique: HashSet<TileKey> = snapshot.rendered.iter().copied().collect();
        assert_eq!(unique.len(), snapshot.rendered.len(), "duplicate renders");
        for &key in &snapshot.rendered {
            assert_eq!(
                tileset.tile(key).unwrap().load_state(),
                TileLoadState::Done,
                "rendered a tile that is not loaded"
            );
            assert_eq!(
                snapshot.newly.contains(&key),
                !previously_rendered.contains(&key),
                "newly-rendered list disagrees with the previous frame"
            );
        }
        for key in &snapshot.no_longer {
            assert!(
                previously_rendered.contains(key),
                "no-longer-rendered tile was not rendered last frame"
            );
        }
        snapshot
    }

    /// Frames 1-3 from scratch: request, worker, render.
    fn settle_root(tileset: &mut Tileset, harness: &TestHarness, camera: &Camera) -> Vec<TileKey> {
        let f1 = run_frame(tileset, camera, &[]);
        assert!(f1.rendered.is_empty());
        let f2 = run_frame(tileset, camera, &f1.rendered);
        assert!(f2.rendered.is_empty());
        harness.tasks.run_all();
        let f3 = run_frame(tileset, camera, &f2.rendered);
        f3.rendered
    }

    #[test]
    fn test_far_camera_renders_only_the_root() {
        init_logging();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();
        let camera = camera_at(4600.0);

        let f1 = run_frame(&mut tileset, &camera, &[]);
        assert!(f1.rendered.is_empty());
        assert_eq!(f1.loading, 1);
        assert_eq!(
            harness.accessor.requested_urls(),
            vec!["https://tiles.test/root.stub".to_owned()]
        );

        let f2 = run_frame(&mut tileset, &camera, &f1.rendered);
        assert_eq!(f2.loading, 1);
        assert_eq!(harness.tasks.run_all(), 1);

        let f3 = run_frame(&mut tileset, &camera, &f2.rendered);
        assert_eq!(f3.rendered, vec![tileset.root().unwrap()]);
        assert_eq!(f3.newly, f3.rendered);
        assert_eq!(f3.loading, 0);

        let f4 = run_frame(&mut tileset, &camera, &f3.rendered);
        assert_eq!(f4.rendered, f3.rendered);
        assert!(f4.newly.is_empty());
        assert!(f4.no_longer.is_empty());
        // The children were never needed.
        assert_eq!(harness.accessor.requested_urls().len(), 1);
    }

    #[test]
    fn test_zooming_in_refines_to_children() {
        init_logging();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();

        let far = camera_at(4600.0);
        let mut rendered = settle_root(&mut tileset, &harness, &far);
        let root = tileset.root().unwrap();
        assert_eq!(rendered, vec![root]);
        let children = tileset.tile(root).unwrap().children().to_vec();

        // Zoom in: the root no longer satisfies the error target, but keeps
        // rendering while the children load.
        let near = camera_at(1600.0);
        let f4 = run_frame(&mut tileset, &near, &rendered);
        assert_eq!(f4.rendered, vec![root]);
        assert!(f4.no_longer.is_empty());
        assert_eq!(f4.loading, 2);
        rendered = f4.rendered;

        let f5 = run_frame(&mut tileset, &near, &rendered);
        assert_eq!(f5.rendered, vec![root]);
        assert_eq!(harness.tasks.run_all(), 2);
        rendered = f5.rendered;

        // Both children are ready: they take over in a single frame.
        let f6 = run_frame(&mut tileset, &near, &rendered);
        assert_eq!(f6.rendered, children);
        assert_eq!(f6.newly, children);
        assert_eq!(f6.no_longer, vec![root]);
        assert_eq!(f6.loading, 0);

        let f7 = run_frame(&mut tileset, &near, &f6.rendered);
        assert_eq!(f7.rendered, children);
        assert!(f7.newly.is_empty());
        assert!(f7.no_longer.is_empty());
    }

    #[test]
    fn test_zooming_back_out_restores_the_root() {
        init_logging();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();

        let near = camera_at(1600.0);
        let f1 = run_frame(&mut tileset, &near, &[]);
        assert!(f1.rendered.is_empty());
        assert_eq!(f1.loading, 3);
        let f2 = run_frame(&mut tileset, &near, &f1.rendered);
        harness.tasks.run_all();
        let f3 = run_frame(&mut tileset, &near, &f2.rendered);
        let root = tileset.root().unwrap();
        let children = tileset.tile(root).unwrap().children().to_vec();
        assert_eq!(f3.rendered, children);

        // Zoom out: the root is already loaded, so it takes over at once.
        let far = camera_at(4600.0);
        let f4 = run_frame(&mut tileset, &far, &f3.rendered);
        assert_eq!(f4.rendered, vec![root]);
        assert_eq!(f4.newly, vec![root]);
        let mut no_longer = f4.no_longer.clone();
        no_longer.sort_by_key(|key| key.index);
        assert_eq!(no_longer, children);
    }

    #[test]
    fn test_culled_root_is_never_rendered() {
        init_logging();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();
        let camera = camera_facing_away(4600.0);

        let f1 = run_frame(&mut tileset, &camera, &[]);
        assert!(f1.rendered.is_empty());
        // Culled, but preloaded at low priority.
        assert_eq!(f1.loading, 1);

        let f2 = run_frame(&mut tileset, &camera, &[]);
        harness.tasks.run_all();
        let f3 = run_frame(&mut tileset, &camera, &f2.rendered);
        assert!(f3.rendered.is_empty());
        assert_eq!(
            tileset
                .tile(tileset.root().unwrap())
                .unwrap()
                .load_state(),
            TileLoadState::Done
        );
    }

    #[test]
    fn test_failed_child_keeps_the_parent_rendered() {
        init_logging();
        let harness = TestHarness::manual();
        harness
            .accessor
            .respond("https://tiles.test/root.stub", stub_response(b"STUB"));
        harness
            .accessor
            .respond("https://tiles.test/a.stub", stub_response(b"STUB"));
        harness
            .accessor
            .respond("https://tiles.test/b.stub", response(404, b""));

        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions {
                forbid_holes: true,
                ..TilesetOptions::default()
            },
        )
        .unwrap();

        let far = camera_at(4600.0);
        let mut rendered = settle_root(&mut tileset, &harness, &far);
        let root = tileset.root().unwrap();
        assert_eq!(rendered, vec![root]);
        let children = tileset.tile(root).unwrap().children().to_vec();

        // Zoom in. One child loads, the other permanently fails; the root
        // must keep rendering alone rather than leave a hole.
        let near = camera_at(1600.0);
        for _ in 0..4 {
            let frame = run_frame(&mut tileset, &near, &rendered);
            assert_eq!(frame.rendered, vec![root]);
            assert!(frame.no_longer.is_empty());
            rendered = frame.rendered;
            harness.tasks.run_all();
        }

        assert_eq!(
            tileset.tile(children[0]).unwrap().load_state(),
            TileLoadState::Done
        );
        assert_eq!(
            tileset.tile(children[1]).unwrap().load_state(),
            TileLoadState::Failed
        );
    }

    #[test]
    fn test_additive_refinement_renders_parent_and_children() {
        init_logging();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("ADD"),
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();

        let far = camera_at(4600.0);
        let mut rendered = settle_root(&mut tileset, &harness, &far);
        let root = tileset.root().unwrap();
        let children = tileset.tile(root).unwrap().children().to_vec();

        let near = camera_at(1600.0);
        let f4 = run_frame(&mut tileset, &near, &rendered);
        assert_eq!(f4.rendered, vec![root]);
        assert!(f4.no_longer.is_empty());
        rendered = f4.rendered;

        let f5 = run_frame(&mut tileset, &near, &rendered);
        assert_eq!(f5.rendered, vec![root]);
        harness.tasks.run_all();
        rendered = f5.rendered;

        // Both levels are in the list once the children arrive.
        let f6 = run_frame(&mut tileset, &near, &rendered);
        assert_eq!(f6.rendered, vec![root, children[0], children[1]]);
        assert_eq!(f6.newly, children);
        assert!(f6.no_longer.is_empty());

        let f7 = run_frame(&mut tileset, &near, &f6.rendered);
        assert_eq!(f7.rendered, f6.rendered);
        assert!(f7.newly.is_empty());
        assert!(f7.no_longer.is_empty());
    }

    #[test]
    fn test_eviction_unloads_least_recently_visited_tiles() {
        init_logging();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions {
                maximum_cached_tiles: 1,
                ..TilesetOptions::default()
            },
        )
        .unwrap();

        let near = camera_at(1600.0);
        let f1 = run_frame(&mut tileset, &near, &[]);
        let f2 = run_frame(&mut tileset, &near, &f1.rendered);
        harness.tasks.run_all();
        let f3 = run_frame(&mut tileset, &near, &f2.rendered);
        let root = tileset.root().unwrap();
        let children = tileset.tile(root).unwrap().children().to_vec();
        assert_eq!(f3.rendered, children);

        // Zoom out. The children stop being visited and fall past the cache
        // limit, so their content is freed.
        let far = camera_at(4600.0);
        let f4 = run_frame(&mut tileset, &far, &f3.rendered);
        assert_eq!(f4.rendered, vec![root]);
        for &child in &children {
            assert_eq!(
                tileset.tile(child).unwrap().load_state(),
                TileLoadState::Unloaded
            );
        }
        assert_eq!(harness.preparer.frees(), 2);
        let requests_after_eviction = harness.accessor.requested_urls().len();

        // Zooming back in loads them over again.
        let f5 = run_frame(&mut tileset, &near, &f4.rendered);
        assert_eq!(f5.rendered, vec![root]);
        assert_eq!(
            harness.accessor.requested_urls().len(),
            requests_after_eviction + 2
        );
    }

    #[test]
    fn test_eviction_skips_tiles_still_loading() {
        init_logging();
        let harness = TestHarness::manual();
        harness
            .accessor
            .respond("https://tiles.test/root.stub", stub_response(b"STUB"));

        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions {
                maximum_cached_tiles: 1,
                ..TilesetOptions::default()
            },
        )
        .unwrap();
        let root = tileset.root().unwrap();
        let children = tileset.tile(root).unwrap().children().to_vec();

        // Zoomed in: the children are requested but their responses never
        // arrive.
        let near = camera_at(1600.0);
        let f1 = run_frame(&mut tileset, &near, &[]);
        assert_eq!(f1.loading, 3);
        let f2 = run_frame(&mut tileset, &near, &f1.rendered);
        harness.tasks.run_all();
        let f3 = run_frame(&mut tileset, &near, &f2.rendered);
        assert_eq!(f3.rendered, vec![root]);

        // Zoomed out with the cache full: mid-load tiles refuse to unload.
        let far = camera_at(4600.0);
        let f4 = run_frame(&mut tileset, &far, &f3.rendered);
        assert_eq!(f4.loading, 2);
        for &child in &children {
            assert_eq!(
                tileset.tile(child).unwrap().load_state(),
                TileLoadState::ContentLoading
            );
        }

        // Once their loads finish, the next frames can evict them.
        harness
            .accessor
            .complete("https://tiles.test/a.stub", stub_response(b"STUB"));
        harness
            .accessor
            .complete("https://tiles.test/b.stub", stub_response(b"STUB"));
        let f5 = run_frame(&mut tileset, &far, &f4.rendered);
        assert_eq!(f5.rendered, vec![root]);
        harness.tasks.run_all();
        let _f6 = run_frame(&mut tileset, &far, &f5.rendered);
        for &child in &children {
            assert_eq!(
                tileset.tile(child).unwrap().load_state(),
                TileLoadState::Unloaded
            );
        }
    }

    #[test]
    fn test_loading_counter_spans_network_and_worker_phases() {
        init_logging();
        let harness = TestHarness::manual();
        harness
            .accessor
            .respond("https://tiles.test/root.stub", stub_response(b"STUB"));

        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();

        // Root, plus both children: all three requested on the first frame.
        let near = camera_at(1600.0);
        let f1 = run_frame(&mut tileset, &near, &[]);
        assert_eq!(f1.loading, 3);

        // The root's response is in, so its load moves to a worker; the
        // children are still on the network. Both phases count.
        let f2 = run_frame(&mut tileset, &near, &f1.rendered);
        assert_eq!(f2.loading, 3);
        assert_eq!(harness.tasks.queued(), 1);
        harness.tasks.run_all();

        let f3 = run_frame(&mut tileset, &near, &f2.rendered);
        assert_eq!(f3.loading, 2);

        harness
            .accessor
            .complete("https://tiles.test/a.stub", stub_response(b"STUB"));
        harness
            .accessor
            .complete("https://tiles.test/b.stub", stub_response(b"STUB"));
        let f4 = run_frame(&mut tileset, &near, &f3.rendered);
        assert_eq!(f4.loading, 2);
        harness.tasks.run_all();

        let f5 = run_frame(&mut tileset, &near, &f4.rendered);
        assert_eq!(f5.loading, 0);
    }

    #[test]
    fn test_viewer_request_volume_gates_rendering() {
        init_logging();
        let json = br#"{
            "root": {
                "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
                "viewerRequestVolume": { "sphere": [0.0, 0.0, 0.0, 200.0] },
                "geometricError": 64.0,
                "content": { "uri": "root.stub" }
            }
        }"#;
        let document = TilesetDocument::from_slice(json).unwrap();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &document,
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();

        // Outside the request volume: treated like a culled tile.
        let outside = camera_at(4600.0);
        let rendered = settle_root(&mut tileset, &harness, &outside);
        assert!(rendered.is_empty());

        // Inside it, the tile renders.
        let inside = camera_at(150.0);
        let frame = run_frame(&mut tileset, &inside, &rendered);
        assert_eq!(frame.rendered, vec![tileset.root().unwrap()]);
    }

    #[test]
    fn test_enforced_culled_error_preloads_descendants() {
        init_logging();
        let json = br#"{
            "root": {
                "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
                "geometricError": 6400.0,
                "children": [
                    {
                        "boundingVolume": { "sphere": [-50.0, 0.0, 0.0, 50.0] },
                        "geometricError": 16.0,
                        "content": { "uri": "a.stub" }
                    },
                    {
                        "boundingVolume": { "sphere": [50.0, 0.0, 0.0, 50.0] },
                        "geometricError": 16.0,
                        "content": { "uri": "b.stub" }
                    }
                ]
            }
        }"#;
        let document = TilesetDocument::from_slice(json).unwrap();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &document,
            BASE,
            TilesetOptions {
                enforce_culled_screen_space_error: true,
                ..TilesetOptions::default()
            },
        )
        .unwrap();

        // Facing away: the whole tree is culled, but the culled traversal
        // still queues the level that meets the relaxed error target.
        let camera = camera_facing_away(1100.0);
        let frame = run_frame(&mut tileset, &camera, &[]);
        assert!(frame.rendered.is_empty());
        assert_eq!(frame.loading, 2);
        let requested = harness.accessor.requested_urls();
        assert!(requested.contains(&"https://tiles.test/a.stub".to_owned()));
        assert!(requested.contains(&"https://tiles.test/b.stub".to_owned()));
    }

    #[test]
    fn test_unenforced_culled_error_preloads_only_the_culled_tile() {
        init_logging();
        let harness = harness_with_content();
        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &two_level_manifest("REPLACE"),
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();

        let camera = camera_facing_away(1100.0);
        let frame = run_frame(&mut tileset, &camera, &[]);
        assert!(frame.rendered.is_empty());
        assert_eq!(
            harness.accessor.requested_urls(),
            vec!["https://tiles.test/root.stub".to_owned()]
        );
    }

    #[test]
    fn test_manifest_loads_over_the_network() {
        init_logging();
        let harness = TestHarness::manual();
        harness.accessor.respond(
            "https://tiles.test/maps/tileset.json",
            stub_response(
                br#"{
                    "root": {
                        "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
                        "geometricError": 64.0,
                        "content": { "uri": "data/root.stub" }
                    }
                }"#,
            ),
        );
        harness.accessor.respond(
            "https://tiles.test/maps/data/root.stub",
            stub_response(b"STUB"),
        );

        let mut tileset = Tileset::new(
            harness.externals.clone(),
            "https://tiles.test/maps/tileset.json",
            TilesetOptions::default(),
        );
        assert!(tileset.root().is_none());

        let camera = camera_at(4600.0);
        let f1 = run_frame(&mut tileset, &camera, &[]);
        assert!(tileset.root().is_some());
        assert!(f1.rendered.is_empty());
        assert_eq!(f1.loading, 1);
        assert_eq!(
            harness.accessor.requested_urls(),
            vec![
                "https://tiles.test/maps/tileset.json".to_owned(),
                "https://tiles.test/maps/data/root.stub".to_owned(),
            ]
        );

        let f2 = run_frame(&mut tileset, &camera, &f1.rendered);
        harness.tasks.run_all();
        let f3 = run_frame(&mut tileset, &camera, &f2.rendered);
        assert_eq!(f3.rendered, vec![tileset.root().unwrap()]);
        assert!(tileset.manifest_error().is_none());
    }

    #[test]
    fn test_manifest_status_failure_leaves_the_tileset_empty() {
        init_logging();
        let harness = TestHarness::manual();
        harness.accessor.respond(BASE, response(404, b""));

        let mut tileset =
            Tileset::new(harness.externals.clone(), BASE, TilesetOptions::default());
        let camera = camera_at(4600.0);

        let f1 = run_frame(&mut tileset, &camera, &[]);
        assert!(f1.rendered.is_empty());
        assert_eq!(f1.loading, 0);
        assert!(tileset.root().is_none());
        assert!(matches!(
            tileset.manifest_error(),
            Some(Error::ManifestStatus { status: 404, .. })
        ));

        // Later frames stay empty and do not retry.
        let f2 = run_frame(&mut tileset, &camera, &[]);
        assert!(f2.rendered.is_empty());
        assert_eq!(harness.accessor.requested_urls().len(), 1);
    }

    #[test]
    fn test_manifest_transport_failure_leaves_the_tileset_empty() {
        init_logging();
        let harness = TestHarness::manual();
        harness.accessor.respond(BASE, response(0, b""));

        let mut tileset =
            Tileset::new(harness.externals.clone(), BASE, TilesetOptions::default());
        run_frame(&mut tileset, &camera_at(4600.0), &[]);
        assert!(matches!(
            tileset.manifest_error(),
            Some(Error::ManifestRequest { .. })
        ));
    }

    #[test]
    fn test_manifest_parse_failure_leaves_the_tileset_empty() {
        init_logging();
        let harness = TestHarness::manual();
        harness.accessor.respond(BASE, stub_response(b"{ not json"));

        let mut tileset =
            Tileset::new(harness.externals.clone(), BASE, TilesetOptions::default());
        run_frame(&mut tileset, &camera_at(4600.0), &[]);
        assert!(tileset.root().is_none());
        assert!(matches!(
            tileset.manifest_error(),
            Some(Error::ManifestParse { .. })
        ));
    }

    #[test]
    fn test_invalid_manifest_root_is_reported() {
        init_logging();
        let harness = TestHarness::manual();
        harness
            .accessor
            .respond(BASE, stub_response(br#"{ "root": { "geometricError": 1.0 } }"#));

        let mut tileset =
            Tileset::new(harness.externals.clone(), BASE, TilesetOptions::default());
        run_frame(&mut tileset, &camera_at(4600.0), &[]);
        assert!(tileset.root().is_none());
        assert!(matches!(
            tileset.manifest_error(),
            Some(Error::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_external_tileset_streams_in() {
        init_logging();
        let json = br#"{
            "root": {
                "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
                "geometricError": 64.0,
                "content": { "uri": "sub/tileset.json" }
            }
        }"#;
        let document = TilesetDocument::from_slice(json).unwrap();

        let harness = TestHarness::manual();
        harness.accessor.respond(
            "https://tiles.test/sub/tileset.json",
            stub_response(
                br#"{
                    "root": {
                        "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 50.0] },
                        "geometricError": 8.0,
                        "content": { "uri": "leaf.stub" }
                    }
                }"#,
            ),
        );
        harness
            .accessor
            .respond("https://tiles.test/sub/leaf.stub", stub_response(b"STUB"));

        let mut tileset = Tileset::from_document(
            harness.externals.clone(),
            &document,
            BASE,
            TilesetOptions::default(),
        )
        .unwrap();
        let root = tileset.root().unwrap();
        let camera = camera_at(1000.0);

        // Frames 1-2 fetch and decode the external manifest.
        let f1 = run_frame(&mut tileset, &camera, &[]);
        assert!(f1.rendered.is_empty());
        let f2 = run_frame(&mut tileset, &camera, &f1.rendered);
        harness.tasks.run_all();

        // Frame 3 splices the subtree in and requests its content.
        let f3 = run_frame(&mut tileset, &camera, &f2.rendered);
        assert!(f3.rendered.is_empty());
        let spliced = tileset.tile(root).unwrap().children().to_vec();
        assert_eq!(spliced.len(), 1);
        assert!(harness
            .accessor
            .requested_urls()
            .contains(&"https://tiles.test/sub/leaf.stub".to_owned()));

        let f4 = run_frame(&mut tileset, &camera, &f3.rendered);
        harness.tasks.run_all();
        let f5 = run_frame(&mut tileset, &camera, &f4.rendered);
        assert_eq!(f5.rendered, spliced);
        // The referring tile is never drawable itself.
        assert!(!tileset.tile(root).unwrap().is_renderable());
    }

    #[test]
    fn test_options_defaults() {
        let options = TilesetOptions::default();
        assert!((options.maximum_screen_space_error - 16.0).abs() < f64::EPSILON);
        assert_eq!(options.maximum_simultaneous_tile_loads, 10);
        assert!(options.preload_ancestors);
        assert!(options.preload_siblings);
        assert_eq!(options.loading_descendant_limit, 20);
        assert!(!options.forbid_holes);
        assert_eq!(options.maximum_cached_tiles, 400);
        assert!(!options.enforce_culled_screen_space_error);
        assert!((options.culled_screen_space_error - 64.0).abs() < f64::EPSILON);
    }

    proptest! {
        /// The render-list invariants hold under arbitrary camera motion,
        /// with a cache small enough to force eviction along the way.
        #[test]
        fn test_invariants_hold_under_camera_motion(
            distances in proptest::collection::vec(150.0..6000.0_f64, 1..12)
        ) {
            let harness = harness_with_content();
            let mut tileset = Tileset::from_document(
                harness.externals.clone(),
                &two_level_manifest("REPLACE"),
                BASE,
                TilesetOptions {
                    maximum_cached_tiles: 2,
                    ..TilesetOptions::default()
                },
            )
            .unwrap();

            let mut rendered: Vec<TileKey> = Vec::new();
            for distance in distances {
                let camera = camera_at(distance);
                for _ in 0..3 {
                    let frame = run_frame(&mut tileset, &camera, &rendered);
                    rendered = frame.rendered;
                    harness.tasks.run_all();
                }
            }
        }
    }
}
