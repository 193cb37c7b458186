//! Model lifecycle management for Kiln.
//!
//! This crate keeps expensive model resources bounded in memory:
//!
//! - **Registry**: resolves short model names to full model paths.
//! - **Resident cache**: at most one loaded model+tokenizer pair, with
//!   serialized load/unload and lease pinning for in-flight use.
//! - **Sweeper**: a supervised background task that evicts idle models.
//! - **History cache**: bounded per-key value history with LRU key eviction.
//!
//! The cache is constructed explicitly at application startup and threaded
//! into request handlers behind an `Arc`; nothing in this crate is global.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiln_abstraction::{LoadError, ModelLoader};
use tracing::debug;

pub mod cache;
pub mod history;
pub mod registry;

pub use cache::{
    load_cache_config, CacheConfig, CacheConfigError, CacheError, CacheStats, CacheSweeper,
    EvictionPolicy, EvictionPolicyKind, ModelLease, ResidentModelCache,
};
pub use history::HistoryCache;
pub use registry::{ModelRegistry, RegistryError, UnknownModelError};

/// A call recorded by `MockLoader`, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    /// A model was loaded from this path.
    Load(String),
    /// The model loaded from this path was released.
    Unload(String),
}

/// Mock model handle produced by `MockLoader`.
#[derive(Debug)]
pub struct MockModel {
    /// The path the handle was loaded from.
    pub path: String,
}

/// Mock tokenizer handle produced by `MockLoader`.
#[derive(Debug)]
pub struct MockTokenizer {
    /// The path the handle was loaded from.
    pub path: String,
}

/// A mock implementation of the `ModelLoader` trait for testing and
/// demonstration.
///
/// Records load/unload calls in order, tracks how many pairs are resident
/// at once, and can be told to fail specific paths or to take a fixed time
/// per load.
#[derive(Debug, Default)]
pub struct MockLoader {
    events: Mutex<Vec<LoaderEvent>>,
    resident: AtomicUsize,
    max_resident: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    load_delay: Option<Duration>,
}

impl MockLoader {
    /// Makes every load take `delay` before completing.
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Makes subsequent loads of `path` fail.
    pub fn fail_path(&self, path: &str) {
        self.failing
            .lock()
            .expect("Failing lock poisoned")
            .insert(path.to_string());
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn events(&self) -> Vec<LoaderEvent> {
        self.events.lock().expect("Events lock poisoned").clone()
    }

    /// Number of successful loads so far.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, LoaderEvent::Load(_)))
            .count()
    }

    /// Number of unloads so far.
    #[must_use]
    pub fn unload_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, LoaderEvent::Unload(_)))
            .count()
    }

    /// Number of pairs currently resident.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.resident.load(Ordering::Acquire)
    }

    /// Highest number of pairs ever resident at once.
    #[must_use]
    pub fn max_resident(&self) -> usize {
        self.max_resident.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ModelLoader for MockLoader {
    type Model = MockModel;
    type Tokenizer = MockTokenizer;

    async fn load(&self, path: &str) -> Result<(MockModel, MockTokenizer), LoadError> {
        if self.failing.lock().expect("Failing lock poisoned").contains(path) {
            return Err(LoadError::Runtime(format!("mock load failure for {path}")));
        }

        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }

        let now_resident = self.resident.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_resident.fetch_max(now_resident, Ordering::AcqRel);
        self.events
            .lock()
            .expect("Events lock poisoned")
            .push(LoaderEvent::Load(path.to_string()));

        debug!(path = %path, "MockLoader loaded model");
        Ok((
            MockModel { path: path.to_string() },
            MockTokenizer { path: path.to_string() },
        ))
    }

    async fn unload(&self, model: Arc<MockModel>, tokenizer: Arc<MockTokenizer>) {
        self.resident.fetch_sub(1, Ordering::AcqRel);
        self.events
            .lock()
            .expect("Events lock poisoned")
            .push(LoaderEvent::Unload(model.path.clone()));

        debug!(path = %model.path, "MockLoader unloaded model");
        drop(model);
        drop(tokenizer);
    }
}
