//! Interfaces the engine requires from its host.
//!
//! The engine never talks to the network, the GPU, or a thread pool
//! directly. Everything it needs arrives through the traits in this module,
//! bundled into a [`TilesetExternals`]. A shipped [`ThreadPoolTaskProcessor`]
//! covers hosts without their own task system; an HTTP-backed
//! [`AssetAccessor`] lives in [`crate::http`] on non-wasm targets.

use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;

use glam::DMat4;

use crate::content::{ContentRegistry, TileContent};
use crate::tile::Tile;

/// A completed response to an asset request.
#[derive(Debug, Clone)]
pub struct AssetResponse {
    /// HTTP status code, or `200` for sources without one.
    pub status: u16,
    /// The `Content-Type` header, when one was present.
    pub content_type: Option<String>,
    /// The response body. Cheap to clone across the worker boundary.
    pub data: Arc<[u8]>,
}

impl AssetResponse {
    /// True for 2xx status codes.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An in-flight or completed request for an asset.
pub trait AssetRequest: Send {
    /// The URL being requested.
    fn url(&self) -> &str;

    /// The response, `None` until the request completes.
    fn response(&self) -> Option<&AssetResponse>;

    /// Asks the underlying transport to stop work on this request. The
    /// response slot may still fill when completion races the cancel.
    fn cancel(&self);

    /// Registers a completion callback.
    ///
    /// Notification only: the engine polls [`response`](Self::response)
    /// during `update_view`, so implementations that never invoke the
    /// callback still work. An implementation that has already completed
    /// should invoke the callback immediately.
    fn on_complete(&self, callback: Box<dyn FnOnce() + Send>);
}

/// The engine's window onto the host's asset transport, be it an HTTP
/// stack, a file system, or a cache hierarchy.
pub trait AssetAccessor: Send + Sync {
    /// Begins fetching `url`, returning the request handle immediately.
    fn request_asset(&self, url: &str) -> Box<dyn AssetRequest>;
}

/// Runs engine tasks on background threads.
///
/// This is the only concurrency primitive the engine requires of its host;
/// everything else happens on the thread that calls `update_view`.
pub trait TaskProcessor: Send + Sync {
    /// Schedules `task` to run on another thread, returning immediately.
    fn start_task(&self, task: Box<dyn FnOnce() + Send>);
}

/// The tile state visible to load-thread preparation.
///
/// Worker tasks never receive the tile itself; the tree is owned by the
/// thread that calls `update_view`.
#[derive(Debug, Clone)]
pub struct LoadContext {
    /// The URL the content was fetched from.
    pub url: String,
    /// The tile's world transform.
    pub transform: DMat4,
}

/// Creates and destroys the host's renderer resources for tile content.
///
/// [`prepare_in_load_thread`](Self::prepare_in_load_thread) runs on a worker
/// thread as soon as content is decoded; [`prepare_in_main_thread`]
/// (Self::prepare_in_main_thread) runs during `update_view` once the tile
/// reaches `ContentLoaded`. Both results are opaque to the engine and handed
/// back to [`free`](Self::free) when the tile unloads.
pub trait PrepareRendererResources: Send + Sync {
    /// Worker-thread preparation, e.g. mesh conversion or texture decoding.
    fn prepare_in_load_thread(
        &self,
        content: &dyn TileContent,
        context: &LoadContext,
    ) -> Option<Box<dyn Any + Send>>;

    /// Main-thread preparation, e.g. GPU uploads. Receives whatever the
    /// load-thread step returned.
    fn prepare_in_main_thread(
        &self,
        tile: &Tile,
        load_result: Option<Box<dyn Any + Send>>,
    ) -> Option<Box<dyn Any + Send>>;

    /// Releases resources. `load_result` is `None` once main-thread
    /// preparation has run; `main_result` is `None` when it never did.
    fn free(
        &self,
        tile: &Tile,
        load_result: Option<Box<dyn Any + Send>>,
        main_result: Option<Box<dyn Any + Send>>,
    );
}

/// The host-supplied collaborators a [`Tileset`](crate::Tileset) runs
/// against.
#[derive(Clone)]
pub struct TilesetExternals {
    /// Fetches manifests and tile content.
    pub asset_accessor: Arc<dyn AssetAccessor>,
    /// Builds renderer resources for loaded content. `None` for hosts that
    /// only want selection, e.g. analytics or tests.
    pub prepare_renderer_resources: Option<Arc<dyn PrepareRendererResources>>,
    /// Runs content decoding and load-thread preparation off the main
    /// thread.
    pub task_processor: Arc<dyn TaskProcessor>,
    /// Recognizes and constructs tile content.
    pub content_registry: Arc<ContentRegistry>,
}

type Task = Box<dyn FnOnce() + Send>;

/// A [`TaskProcessor`] backed by a fixed pool of worker threads.
///
/// Tasks are queued on a bounded channel and picked up by named worker
/// threads. Dropping the pool closes the queue, lets queued tasks finish,
/// and joins every worker.
pub struct ThreadPoolTaskProcessor {
    sender: async_channel::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolTaskProcessor {
    /// Creates a pool with `thread_count` workers (at least one).
    #[must_use]
    pub fn new(thread_count: usize) -> Self {
        Self::named("strata-worker", thread_count)
    }

    /// Creates a pool whose threads are named `{prefix}-{index}`.
    #[must_use]
    pub fn named(prefix: &str, thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let (sender, receiver) = async_channel::bounded::<Task>((thread_count * 2).max(32));

        let workers = (0..thread_count)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("{prefix}-{i}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv_blocking() {
                            task();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { sender, workers }
    }
}

impl Default for ThreadPoolTaskProcessor {
    /// A pool sized to the machine, leaving one core for the main thread.
    fn default() -> Self {
        let threads = std::thread::available_parallelism().map_or(2, |n| n.get().saturating_sub(1));
        Self::new(threads)
    }
}

impl TaskProcessor for ThreadPoolTaskProcessor {
    fn start_task(&self, task: Task) {
        // The channel only closes in drop, so the send cannot fail while
        // `self` is alive.
        let _ = self.sender.send_blocking(task);
    }
}

impl Drop for ThreadPoolTaskProcessor {
    fn drop(&mut self) {
        self.sender.close();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
