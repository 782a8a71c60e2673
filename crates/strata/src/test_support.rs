//! Deterministic fakes for the engine's external interfaces, shared by the
//! unit tests: a scriptable asset accessor, a hand-cranked task processor,
//! and a renderer-resource preparer that records what it was asked to do.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::content::{ContentRegistry, TileContent};
use crate::externals::{
    AssetAccessor, AssetRequest, AssetResponse, LoadContext, PrepareRendererResources,
    TaskProcessor, TilesetExternals,
};
use crate::tile::Tile;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn response(status: u16, data: &[u8]) -> AssetResponse {
    AssetResponse {
        status,
        content_type: None,
        data: Arc::from(data),
    }
}

pub fn stub_response(data: &[u8]) -> AssetResponse {
    response(200, data)
}

/// Content recognized by the `STUB` payload prefix.
pub struct StubContent;

impl TileContent for StubContent {
    fn kind(&self) -> &'static str {
        "stub"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The default registry plus [`StubContent`].
pub fn test_registry() -> ContentRegistry {
    let mut registry = ContentRegistry::with_defaults();
    registry.register(
        "stub",
        |_url, data| data.starts_with(b"STUB"),
        |_url, _data| Ok(Box::new(StubContent) as Box<dyn TileContent>),
    );
    registry
}

#[derive(Default)]
struct RequestState {
    slot: OnceLock<AssetResponse>,
    cancelled: AtomicBool,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl RequestState {
    fn complete(&self, response: AssetResponse) {
        if self.slot.set(response).is_ok() {
            let callback = self.callback.lock().unwrap().take();
            if let Some(callback) = callback {
                callback();
            }
        }
    }
}

struct FakeRequest {
    url: String,
    state: Arc<RequestState>,
}

impl AssetRequest for FakeRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn response(&self) -> Option<&AssetResponse> {
        self.state.slot.get()
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    fn on_complete(&self, callback: Box<dyn FnOnce() + Send>) {
        if self.state.slot.get().is_some() {
            callback();
        } else {
            *self.state.callback.lock().unwrap() = Some(callback);
        }
    }
}

/// An asset accessor answering from a canned URL table. Requests for URLs
/// without a canned response stay pending until [`FakeAccessor::complete`].
#[derive(Default)]
pub struct FakeAccessor {
    canned: Mutex<HashMap<String, AssetResponse>>,
    issued: Mutex<Vec<(String, Arc<RequestState>)>>,
}

impl FakeAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a response to hand out as soon as `url` is requested.
    pub fn respond(&self, url: &str, response: AssetResponse) {
        self.canned.lock().unwrap().insert(url.to_owned(), response);
    }

    /// Completes the oldest pending request for `url`.
    ///
    /// # Panics
    ///
    /// Panics when no such request is pending.
    pub fn complete(&self, url: &str, response: AssetResponse) {
        let issued = self.issued.lock().unwrap();
        let state = issued
            .iter()
            .find(|(issued_url, state)| issued_url == url && state.slot.get().is_none())
            .map(|(_, state)| Arc::clone(state));
        drop(issued);
        state
            .unwrap_or_else(|| panic!("no pending request for {url}"))
            .complete(response);
    }

    /// Every URL requested so far, in order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn was_cancelled(&self, url: &str) -> bool {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .any(|(issued_url, state)| issued_url == url && state.cancelled.load(Ordering::Acquire))
    }
}

impl AssetAccessor for FakeAccessor {
    fn request_asset(&self, url: &str) -> Box<dyn AssetRequest> {
        let state = Arc::new(RequestState::default());
        self.issued
            .lock()
            .unwrap()
            .push((url.to_owned(), Arc::clone(&state)));
        if let Some(response) = self.canned.lock().unwrap().get(url).cloned() {
            state.complete(response);
        }
        Box::new(FakeRequest {
            url: url.to_owned(),
            state,
        })
    }
}

/// A task processor that queues tasks until the test runs them.
#[derive(Default)]
pub struct ManualTasks {
    tasks: Mutex<std::collections::VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl ManualTasks {
    pub fn queued(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Runs queued tasks, including any they enqueue, returning how many ran.
    pub fn run_all(&self) -> usize {
        let mut count = 0;
        loop {
            let task = self.tasks.lock().unwrap().pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            count += 1;
        }
        count
    }
}

impl TaskProcessor for ManualTasks {
    fn start_task(&self, task: Box<dyn FnOnce() + Send>) {
        self.tasks.lock().unwrap().push_back(task);
    }
}

/// Counts preparer calls and remembers which results the last free carried.
#[derive(Default)]
pub struct RecordingPreparer {
    load_prepares: AtomicUsize,
    main_prepares: AtomicUsize,
    frees: AtomicUsize,
    last_free_load_some: AtomicBool,
    last_free_main_some: AtomicBool,
}

impl RecordingPreparer {
    pub fn load_prepares(&self) -> usize {
        self.load_prepares.load(Ordering::Relaxed)
    }

    pub fn main_prepares(&self) -> usize {
        self.main_prepares.load(Ordering::Relaxed)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }

    /// Whether the last free call carried a load-thread and a main-thread
    /// result, respectively.
    pub fn last_free_args(&self) -> (bool, bool) {
        (
            self.last_free_load_some.load(Ordering::Relaxed),
            self.last_free_main_some.load(Ordering::Relaxed),
        )
    }
}

impl PrepareRendererResources for RecordingPreparer {
    fn prepare_in_load_thread(
        &self,
        _content: &dyn TileContent,
        _context: &LoadContext,
    ) -> Option<Box<dyn Any + Send>> {
        self.load_prepares.fetch_add(1, Ordering::Relaxed);
        Some(Box::new("load-thread resources"))
    }

    fn prepare_in_main_thread(
        &self,
        _tile: &Tile,
        _load_result: Option<Box<dyn Any + Send>>,
    ) -> Option<Box<dyn Any + Send>> {
        self.main_prepares.fetch_add(1, Ordering::Relaxed);
        Some(Box::new("main-thread resources"))
    }

    fn free(
        &self,
        _tile: &Tile,
        load_result: Option<Box<dyn Any + Send>>,
        main_result: Option<Box<dyn Any + Send>>,
    ) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.last_free_load_some
            .store(load_result.is_some(), Ordering::Relaxed);
        self.last_free_main_some
            .store(main_result.is_some(), Ordering::Relaxed);
    }
}

/// The external interfaces bundled up, with handles kept for inspection.
pub struct TestHarness {
    pub accessor: Arc<FakeAccessor>,
    pub tasks: Arc<ManualTasks>,
    pub preparer: Arc<RecordingPreparer>,
    pub externals: TilesetExternals,
}

impl TestHarness {
    /// A harness whose worker tasks run only when the test says so.
    pub fn manual() -> Self {
        let accessor = Arc::new(FakeAccessor::new());
        let tasks = Arc::new(ManualTasks::default());
        let preparer = Arc::new(RecordingPreparer::default());
        let externals = TilesetExternals {
            asset_accessor: Arc::clone(&accessor) as Arc<dyn AssetAccessor>,
            prepare_renderer_resources: Some(
                Arc::clone(&preparer) as Arc<dyn PrepareRendererResources>
            ),
            task_processor: Arc::clone(&tasks) as Arc<dyn TaskProcessor>,
            content_registry: Arc::new(test_registry()),
        };
        Self {
            accessor,
            tasks,
            preparer,
            externals,
        }
    }
}

// Kept exercised here so fixture regressions surface next to the fixture.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_accessor_pending_then_complete() {
        let accessor = FakeAccessor::new();
        let request = accessor.request_asset("https://tiles.test/slow.stub");
        assert!(request.response().is_none());

        accessor.complete("https://tiles.test/slow.stub", stub_response(b"STUB"));
        assert_eq!(request.response().unwrap().status, 200);
        assert_eq!(
            accessor.requested_urls(),
            vec!["https://tiles.test/slow.stub".to_owned()]
        );
    }

    #[test]
    fn test_fake_accessor_canned_completes_immediately() {
        let accessor = FakeAccessor::new();
        accessor.respond("https://tiles.test/fast.stub", response(204, b""));

        let request = accessor.request_asset("https://tiles.test/fast.stub");
        assert_eq!(request.response().unwrap().status, 204);
    }

    #[test]
    fn test_manual_tasks_run_in_order() {
        let tasks = ManualTasks::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            tasks.start_task(Box::new(move || log.lock().unwrap().push(i)));
        }

        assert_eq!(tasks.queued(), 3);
        assert_eq!(tasks.run_all(), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(tasks.queued(), 0);
    }
}
