//! Resident-model caching for bounded model lifecycle.
//!
//! This module keeps at most one expensive model+tokenizer pair in memory,
//! serializes load/unload against concurrent requests, and evicts models
//! that sit idle past a configurable threshold via a supervised background
//! sweep.

pub mod cache;
pub mod config;
pub mod sweeper;
pub mod types;

pub use cache::{CacheError, ResidentModelCache};
pub use config::{
    load_cache_config, CacheConfig, CacheConfigError, EvictionPolicy, EvictionPolicyKind,
};
pub use sweeper::CacheSweeper;
pub use types::{CacheStats, ModelLease};
