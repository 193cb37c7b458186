//! Resident-model cache: at most one loaded model, serialized load/unload,
//! idle-based eviction.
//!
//! Consolidates the usual per-route model caching into one explicitly owned
//! component: the embedding application constructs a cache at startup and
//! threads it (behind an `Arc`) into request handlers and the sweeper. There
//! is no global state.

use std::sync::{Arc, RwLock};

use kiln_abstraction::{LoadError, ModelLoader};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigError, EvictionPolicy};
use super::types::{CacheStats, ModelLease, ResidentModel};
use crate::registry::{ModelRegistry, UnknownModelError};

/// Errors surfaced by the resident-model cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The requested name does not resolve to a known model. Raised before
    /// any eviction of the resident model.
    #[error(transparent)]
    UnknownModel(#[from] UnknownModelError),

    /// The runtime failed to load the requested model. The cache is left
    /// with nothing resident.
    #[error("Failed to load model: {0}")]
    Load(#[from] LoadError),
}

/// Cache holding at most one loaded model+tokenizer pair.
///
/// A single async lock serializes the whole read-decide-evict-load sequence,
/// so concurrent requests for the same model wait on the in-flight load
/// instead of loading twice, and the sweep can never evict an entry that a
/// concurrent `acquire` is touching.
pub struct ResidentModelCache<L: ModelLoader> {
    /// The runtime that materializes and releases model resources.
    loader: Arc<L>,
    /// Name → path resolution.
    registry: ModelRegistry,
    /// When the background sweep may evict the resident model.
    policy: EvictionPolicy,
    /// The one slot. `None` means nothing resident.
    slot: Mutex<Option<ResidentModel<L>>>,
    /// Cache statistics.
    stats: RwLock<CacheStats>,
}

impl<L: ModelLoader> ResidentModelCache<L> {
    /// Creates a cache from a validated configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn from_config(
        loader: Arc<L>,
        registry: ModelRegistry,
        config: &CacheConfig,
    ) -> Result<Self, CacheConfigError> {
        config.validate()?;
        Ok(Self::with_policy(loader, registry, config.eviction_policy()))
    }

    /// Creates a cache with an explicit eviction policy.
    #[must_use]
    pub fn with_policy(loader: Arc<L>, registry: ModelRegistry, policy: EvictionPolicy) -> Self {
        Self {
            loader,
            registry,
            policy,
            slot: Mutex::new(None),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// The cache's eviction policy.
    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// The registry this cache resolves names against.
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Acquires a lease on `name`, loading the model first if necessary.
    ///
    /// A hit updates the last-use time and returns without I/O. A miss with a
    /// different model resident waits for that model's leases to drain,
    /// unloads it, and then loads the requested one; the requested model is
    /// fully resident before this returns. Expect a switch or cold start to
    /// block for the duration of the load.
    ///
    /// # Errors
    /// Returns `CacheError::UnknownModel` when `name` is not in the registry
    /// (checked before any eviction), or `CacheError::Load` when the runtime
    /// load fails (the slot is left empty).
    pub async fn acquire(&self, name: &str) -> Result<ModelLease<L>, CacheError> {
        // Resolve before locking: an unknown name must not evict anything.
        let path = self.registry.resolve(name)?.to_string();

        let mut slot = self.slot.lock().await;

        if let Some(entry) = slot.as_ref() {
            if entry.name == name {
                let lease = entry.lease();
                self.record(|stats| stats.total_hits += 1);
                debug!(model = %name, "Model cache hit");
                return Ok(lease);
            }
        }

        // Different model resident (or nothing): make room, then load.
        self.unload_entry(&mut slot, "switching models").await;
        self.record(|stats| stats.total_misses += 1);
        info!(model = %name, path = %path, "Loading model");

        match self.loader.load(&path).await {
            Ok((model, tokenizer)) => {
                let entry = ResidentModel::new(name.to_string(), path, model, tokenizer);
                let lease = entry.lease();
                *slot = Some(entry);
                info!(model = %name, "Model loaded and cached");
                Ok(lease)
            }
            Err(e) => {
                self.record(|stats| stats.load_failures += 1);
                warn!(model = %name, error = %e, "Model load failed");
                Err(CacheError::Load(e))
            }
        }
    }

    /// Updates the last-use time of a matching resident entry.
    ///
    /// Returns `false` when `name` is not resident. No I/O. Callers that
    /// stream output prefer `ModelLease::touch`, which skips the cache lock.
    pub async fn touch(&self, name: &str) -> bool {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(entry) if entry.name == name => {
                entry.lease_state.touch();
                true
            }
            _ => false,
        }
    }

    /// Evicts the resident model if it has been idle past the policy
    /// threshold. This is the body of one background sweep.
    ///
    /// Shares the cache lock with `acquire`, so the check-and-evict step can
    /// never race an in-flight load. Entries with outstanding leases are
    /// never evicted. Returns whether an eviction happened.
    pub async fn release_idle(&self) -> bool {
        let Some(threshold) = self.policy.idle_threshold() else {
            return false;
        };

        let mut slot = self.slot.lock().await;
        let Some(entry) = slot.as_ref() else {
            return false;
        };

        if entry.lease_state.active() > 0 {
            debug!(model = %entry.name, "Skipping idle check, model is leased");
            return false;
        }

        let idle = entry.lease_state.idle_for();
        if idle <= threshold {
            return false;
        }

        info!(
            model = %entry.name,
            idle_secs = idle.as_secs_f64(),
            "Model idle past threshold, unloading"
        );
        self.unload_entry(&mut slot, "idle timeout").await;
        true
    }

    /// Explicitly unloads `name` if it is the resident model.
    ///
    /// Safe to call when nothing (or another model) is resident; returns
    /// whether an unload happened. Waits for outstanding leases to drain.
    pub async fn evict(&self, name: &str) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_none_or(|entry| entry.name != name) {
            return false;
        }
        self.unload_entry(&mut slot, "explicit evict").await;
        true
    }

    /// Unloads whatever model is resident. Used on shutdown and cache-clear.
    ///
    /// Returns whether an unload happened.
    pub async fn clear(&self) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            return false;
        }
        self.unload_entry(&mut slot, "cache clear").await;
        true
    }

    /// Name of the currently resident model, if any.
    pub async fn resident(&self) -> Option<String> {
        self.slot.lock().await.as_ref().map(|entry| entry.name.clone())
    }

    /// Snapshot of cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().expect("Stats lock poisoned").clone();
        stats.resident = self.slot.lock().await.as_ref().map(|entry| entry.name.clone());
        stats
    }

    /// Takes the entry out of the slot, waits for its leases to drain, and
    /// releases its resources through the loader.
    async fn unload_entry(&self, slot: &mut Option<ResidentModel<L>>, reason: &str) {
        let Some(entry) = slot.take() else {
            return;
        };

        if entry.lease_state.active() > 0 {
            debug!(
                model = %entry.name,
                reason,
                "Waiting for outstanding leases before unload"
            );
            entry.lease_state.drained().await;
        }

        info!(model = %entry.name, reason, "Unloading model");
        self.loader.unload(entry.model, entry.tokenizer).await;
        self.record(|stats| stats.total_evictions += 1);
        info!(model = %entry.name, "Model unloaded and memory cleared");
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.write().expect("Stats lock poisoned");
        update(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoaderEvent, MockLoader};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn test_registry() -> ModelRegistry {
        let mut models = BTreeMap::new();
        models.insert("alpha".to_string(), "models/alpha".to_string());
        models.insert("beta".to_string(), "models/beta".to_string());
        ModelRegistry::new(models)
    }

    fn test_cache(loader: Arc<MockLoader>, policy: EvictionPolicy) -> ResidentModelCache<MockLoader> {
        ResidentModelCache::with_policy(loader, test_registry(), policy)
    }

    #[tokio::test]
    async fn test_hit_returns_same_instance() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::KeepResident);

        let first = cache.acquire("alpha").await.unwrap();
        let second = cache.acquire("alpha").await.unwrap();

        assert!(Arc::ptr_eq(&first.model(), &second.model()));
        assert_eq!(loader.load_count(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.total_misses, 1);
    }

    #[tokio::test]
    async fn test_switch_unloads_then_loads() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::KeepResident);

        drop(cache.acquire("alpha").await.unwrap());
        drop(cache.acquire("beta").await.unwrap());

        assert_eq!(
            loader.events(),
            vec![
                LoaderEvent::Load("models/alpha".to_string()),
                LoaderEvent::Unload("models/alpha".to_string()),
                LoaderEvent::Load("models/beta".to_string()),
            ]
        );
        assert_eq!(cache.resident().await, Some("beta".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_model_preserves_resident() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::KeepResident);

        drop(cache.acquire("alpha").await.unwrap());

        let err = cache.acquire("nonexistent").await.unwrap_err();
        assert!(matches!(err, CacheError::UnknownModel(_)));
        assert!(err.to_string().contains("Available models"));

        // Still resident, no unload happened.
        assert_eq!(cache.resident().await, Some("alpha".to_string()));
        assert_eq!(loader.unload_count(), 0);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_cache_empty() {
        let loader = Arc::new(MockLoader::default());
        loader.fail_path("models/beta");
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::KeepResident);

        drop(cache.acquire("alpha").await.unwrap());

        let err = cache.acquire("beta").await.unwrap_err();
        assert!(matches!(err, CacheError::Load(_)));

        // The switch already unloaded alpha; the failed load must not leave
        // a partial entry behind.
        assert_eq!(cache.resident().await, None);
        assert_eq!(cache.stats().await.load_failures, 1);

        // The cache recovers on the next acquire.
        drop(cache.acquire("alpha").await.unwrap());
        assert_eq!(cache.resident().await, Some("alpha".to_string()));
    }

    #[tokio::test]
    async fn test_release_idle_respects_threshold() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(
            Arc::clone(&loader),
            EvictionPolicy::FixedTimeout(Duration::from_millis(60)),
        );

        drop(cache.acquire("alpha").await.unwrap());

        assert!(!cache.release_idle().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.release_idle().await);
        assert_eq!(cache.resident().await, None);

        // Nothing resident: eviction is a no-op.
        assert!(!cache.release_idle().await);
    }

    #[tokio::test]
    async fn test_release_idle_never_fires_for_keep_resident() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::KeepResident);

        drop(cache.acquire("alpha").await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!cache.release_idle().await);
        assert_eq!(cache.resident().await, Some("alpha".to_string()));
    }

    #[tokio::test]
    async fn test_release_idle_skips_leased_entry() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::UnloadAfterUse);

        let lease = cache.acquire("alpha").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!cache.release_idle().await);
        assert_eq!(cache.resident().await, Some("alpha".to_string()));

        drop(lease);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.release_idle().await);
        assert_eq!(cache.resident().await, None);
    }

    #[tokio::test]
    async fn test_touch_resets_idle_clock() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(
            Arc::clone(&loader),
            EvictionPolicy::FixedTimeout(Duration::from_millis(80)),
        );

        drop(cache.acquire("alpha").await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.touch("alpha").await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 50ms since the touch: under the threshold even though 110ms have
        // passed since the load.
        assert!(!cache.release_idle().await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.release_idle().await);
    }

    #[tokio::test]
    async fn test_touch_misses_non_resident_name() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::KeepResident);

        assert!(!cache.touch("alpha").await);
        drop(cache.acquire("alpha").await.unwrap());
        assert!(!cache.touch("beta").await);
        assert!(cache.touch("alpha").await);
    }

    #[tokio::test]
    async fn test_evict_and_clear() {
        let loader = Arc::new(MockLoader::default());
        let cache = test_cache(Arc::clone(&loader), EvictionPolicy::KeepResident);

        // Safe on an empty cache.
        assert!(!cache.evict("alpha").await);
        assert!(!cache.clear().await);

        drop(cache.acquire("alpha").await.unwrap());
        assert!(!cache.evict("beta").await);
        assert!(cache.evict("alpha").await);
        assert_eq!(cache.resident().await, None);

        drop(cache.acquire("beta").await.unwrap());
        assert!(cache.clear().await);
        assert_eq!(cache.resident().await, None);
        assert_eq!(loader.resident_count(), 0);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let loader = Arc::new(MockLoader::default());
        let config = CacheConfig {
            sweep_interval_secs: 0,
            ..CacheConfig::default()
        };

        let result = ResidentModelCache::from_config(loader, test_registry(), &config);
        assert!(result.is_err());
    }
}
