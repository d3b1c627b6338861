//! In-memory [`Fetcher`] with canned responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, Semaphore};
use url::Url;

use super::{FetchError, Fetcher};

/// Serves bytes registered per URL without touching the network.
///
/// An optional gate holds every fetch until the gate hands out a permit,
/// which lets callers keep additions in flight for as long as they need.
/// In-flight and peak concurrency are tracked so callers can observe how
/// many fetches overlapped.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    responses: RwLock<HashMap<String, Result<Bytes, FetchError>>>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    calls: AtomicUsize,
    changed: Notify,
}

impl MemoryFetcher {
    /// Create a fetcher that answers immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher whose fetches each wait for one permit from `gate`.
    ///
    /// Permits are consumed, so `gate.add_permits(n)` releases exactly `n`
    /// fetches.
    #[must_use]
    pub fn with_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Register the body returned for `url`.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), Ok(body.into()));
    }

    /// Register a failure returned for `url`.
    pub fn insert_error(&self, url: impl Into<String>, error: FetchError) {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), Err(error));
    }

    /// Fetches currently executing.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that ever executed at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Fetches started so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` fetches are executing.
    pub async fn wait_for_in_flight(&self, count: usize) {
        loop {
            let changed = self.changed.notified();
            if self.in_flight() >= count {
                return;
            }
            changed.await;
        }
    }
}

/// Decrements the in-flight counter even when the fetch future is dropped.
struct InFlight<'a>(&'a MemoryFetcher);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.changed.notify_waiters();
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(self);
        self.changed.notify_waiters();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.responses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| Err(FetchError::NotAvailable(url.to_string())))
    }
}
