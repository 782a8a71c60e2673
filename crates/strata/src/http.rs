//! HTTP-backed asset fetching for native targets.
//!
//! [`HttpAssetAccessor`] is the shipped convenience implementation of
//! [`AssetAccessor`]: a blocking `reqwest` client driven by a small pool of
//! fetch threads. Each request fills a shared response slot that the engine
//! polls from `update_view`; nothing here ever blocks the calling thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::externals::{
    AssetAccessor, AssetRequest, AssetResponse, TaskProcessor, ThreadPoolTaskProcessor,
};

/// An [`AssetAccessor`] backed by a blocking `reqwest` client.
///
/// Transport failures (DNS, refused connections, timeouts) complete the
/// request with a synthesized status-0 response so the owning tile fails
/// instead of waiting forever.
pub struct HttpAssetAccessor {
    client: reqwest::blocking::Client,
    fetch_pool: ThreadPoolTaskProcessor,
}

impl HttpAssetAccessor {
    /// Creates an accessor with four fetch threads.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fetch_threads(4)
    }

    /// Creates an accessor with a custom number of fetch threads.
    #[must_use]
    pub fn with_fetch_threads(threads: usize) -> Self {
        Self::with_client(reqwest::blocking::Client::new(), threads)
    }

    /// Creates an accessor around a preconfigured client, for hosts that
    /// need custom timeouts, proxies, or headers.
    #[must_use]
    pub fn with_client(client: reqwest::blocking::Client, threads: usize) -> Self {
        Self {
            client,
            fetch_pool: ThreadPoolTaskProcessor::named("strata-fetch", threads),
        }
    }
}

impl Default for HttpAssetAccessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetAccessor for HttpAssetAccessor {
    fn request_asset(&self, url: &str) -> Box<dyn AssetRequest> {
        let shared = Arc::new(SharedState {
            slot: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            callback: Mutex::new(None),
        });

        let client = self.client.clone();
        let task_shared = Arc::clone(&shared);
        let task_url = url.to_owned();
        self.fetch_pool.start_task(Box::new(move || {
            if task_shared.cancelled.load(Ordering::Acquire) {
                return;
            }
            task_shared.complete(fetch(&client, &task_url));
        }));

        Box::new(HttpAssetRequest {
            url: url.to_owned(),
            shared,
        })
    }
}

type CompletionCallback = Box<dyn FnOnce() + Send>;

/// State shared between the request handle and the fetch thread.
struct SharedState {
    slot: OnceLock<AssetResponse>,
    cancelled: AtomicBool,
    callback: Mutex<Option<CompletionCallback>>,
}

impl SharedState {
    /// Publishes the response, then runs any registered callback. The slot
    /// is written before the callback observes it.
    fn complete(&self, response: AssetResponse) {
        if self.slot.set(response).is_ok() {
            let callback = self
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(callback) = callback {
                callback();
            }
        }
    }
}

struct HttpAssetRequest {
    url: String,
    shared: Arc<SharedState>,
}

impl AssetRequest for HttpAssetRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn response(&self) -> Option<&AssetResponse> {
        self.shared.slot.get()
    }

    fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    fn on_complete(&self, callback: CompletionCallback) {
        let mut stored = self
            .shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.slot.get().is_some() {
            drop(stored);
            callback();
        } else {
            *stored = Some(callback);
        }
    }
}

fn fetch(client: &reqwest::blocking::Client, url: &str) -> AssetResponse {
    tracing::debug!(url, "fetching");

    let response = match client.get(url).send() {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url, error = %e, "request failed without a response");
            return transport_failure();
        }
    };

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match response.bytes() {
        Ok(bytes) => AssetResponse {
            status,
            content_type,
            data: Arc::from(bytes.as_ref()),
        },
        Err(e) => {
            tracing::warn!(url, error = %e, "failed to read response body");
            transport_failure()
        }
    }
}

fn transport_failure() -> AssetResponse {
    AssetResponse {
        status: 0,
        content_type: None,
        data: Arc::from(&b""[..]),
    }
}
