//! Core data types for the resident-model cache.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use kiln_abstraction::ModelLoader;
use serde::Serialize;
use tokio::sync::Notify;

/// Access-tracking state shared between a resident entry and its leases.
///
/// Lives outside the cache lock: lease drops and per-token touches only hit
/// atomics, so an in-flight generation never contends with loads or sweeps.
#[derive(Debug)]
pub(crate) struct LeaseState {
    /// Number of outstanding leases for the entry.
    active: AtomicUsize,
    /// Last-use time, as milliseconds since `epoch`.
    last_used_ms: AtomicU64,
    /// Reference point for `last_used_ms` (the load time).
    epoch: Instant,
    /// Signaled whenever the lease count drops to zero.
    released: Notify,
}

impl LeaseState {
    pub(crate) fn new(epoch: Instant) -> Self {
        Self {
            active: AtomicUsize::new(0),
            last_used_ms: AtomicU64::new(0),
            epoch,
            released: Notify::new(),
        }
    }

    /// Number of outstanding leases.
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Records a use right now. `fetch_max` keeps the value monotonically
    /// non-decreasing even when touches race.
    pub(crate) fn touch(&self) {
        let elapsed_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_used_ms.fetch_max(elapsed_ms, Ordering::AcqRel);
    }

    /// Time elapsed since the last recorded use.
    pub(crate) fn idle_for(&self) -> Duration {
        let last_used = Duration::from_millis(self.last_used_ms.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last_used)
    }

    pub(crate) fn pin(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.released.notify_waiters();
        }
    }

    /// Waits until no leases are outstanding.
    pub(crate) async fn drained(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register interest before re-checking, so an unpin between the
            // check and the await cannot be missed.
            released.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            released.await;
        }
    }
}

/// The resident entry: the one loaded model+tokenizer pair and its metadata.
///
/// Both handles are present or the whole entry is absent; the cache never
/// stores a partially loaded entry.
pub(crate) struct ResidentModel<L: ModelLoader> {
    /// Short model name (registry key).
    pub(crate) name: String,
    /// Resolved model path, kept for diagnostics.
    pub(crate) path: String,
    /// The loaded model handle.
    pub(crate) model: Arc<L::Model>,
    /// The tokenizer handle, released together with the model.
    pub(crate) tokenizer: Arc<L::Tokenizer>,
    /// When the entry was created. Diagnostics only; eviction uses last use.
    pub(crate) loaded_at: Instant,
    /// Shared lease count and last-use tracking.
    pub(crate) lease_state: Arc<LeaseState>,
}

impl<L: ModelLoader> ResidentModel<L> {
    pub(crate) fn new(name: String, path: String, model: L::Model, tokenizer: L::Tokenizer) -> Self {
        let now = Instant::now();
        Self {
            name,
            path,
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            loaded_at: now,
            lease_state: Arc::new(LeaseState::new(now)),
        }
    }

    /// Pins the entry and hands out a lease on its handles.
    pub(crate) fn lease(&self) -> ModelLease<L> {
        ModelLease::new(self)
    }
}

impl<L: ModelLoader> fmt::Debug for ResidentModel<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResidentModel")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("loaded_at", &self.loaded_at)
            .field("active_leases", &self.lease_state.active())
            .finish_non_exhaustive()
    }
}

/// Exclusive-use handle to the resident model, returned by `acquire`.
///
/// The lease pins the entry: neither the idle sweep nor a model switch will
/// unload the model while a lease is alive. Dropping the lease records the
/// end of use, so idle time is measured from when work actually finished,
/// not from when the request started.
pub struct ModelLease<L: ModelLoader> {
    name: String,
    model: Arc<L::Model>,
    tokenizer: Arc<L::Tokenizer>,
    state: Arc<LeaseState>,
}

impl<L: ModelLoader> ModelLease<L> {
    fn new(entry: &ResidentModel<L>) -> Self {
        entry.lease_state.pin();
        entry.lease_state.touch();
        Self {
            name: entry.name.clone(),
            model: Arc::clone(&entry.model),
            tokenizer: Arc::clone(&entry.tokenizer),
            state: Arc::clone(&entry.lease_state),
        }
    }

    /// The short name of the leased model.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.name
    }

    /// The loaded model handle.
    #[must_use]
    pub fn model(&self) -> Arc<L::Model> {
        Arc::clone(&self.model)
    }

    /// The tokenizer handle.
    #[must_use]
    pub fn tokenizer(&self) -> Arc<L::Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    /// Records a use right now.
    ///
    /// Streaming callers invoke this after each emitted token so the idle
    /// clock tracks the generation instead of the request start. Cheap: a
    /// pair of atomic operations, no lock, no I/O.
    pub fn touch(&self) {
        self.state.touch();
    }
}

impl<L: ModelLoader> Drop for ModelLease<L> {
    fn drop(&mut self) {
        self.state.touch();
        self.state.unpin();
    }
}

impl<L: ModelLoader> fmt::Debug for ModelLease<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease")
            .field("name", &self.name)
            .field("active_leases", &self.state.active())
            .finish_non_exhaustive()
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Total number of cache hits.
    pub total_hits: u64,
    /// Total number of cache misses.
    pub total_misses: u64,
    /// Total number of unloads (switch, idle sweep, or explicit).
    pub total_evictions: u64,
    /// Total number of failed load attempts.
    pub load_failures: u64,
    /// Name of the currently resident model, if any.
    pub resident: Option<String>,
}
