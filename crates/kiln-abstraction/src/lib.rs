//! Loader abstraction layer for Kiln.
//!
//! This crate defines the seam between the resident-model cache and the
//! inference runtime that actually materializes model weights.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur while loading a model into memory.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadError {
    /// The model weights could not be read at the resolved path.
    #[error("Weights Error: {0}")]
    Weights(String),

    /// The tokenizer companion to the model failed to initialize.
    #[error("Tokenizer Error: {0}")]
    Tokenizer(String),

    /// The runtime could not allocate memory for the weights.
    #[error("Out Of Memory: {0}")]
    OutOfMemory(String),

    /// The underlying inference runtime reported a failure.
    #[error("Runtime Error: {0}")]
    Runtime(String),

    /// Other unexpected errors.
    #[error("Other Load Error: {0}")]
    Other(String),
}

/// A trait for loading and unloading expensive model resources.
///
/// Implementations wrap a concrete inference runtime. Loading is expected to
/// be slow (disk I/O, large allocations, device transfer) and is treated as a
/// blocking-but-awaited operation by callers. `load` must either return both
/// handles or fail; there is no partial success.
///
/// All loaders must be `Send + Sync` to allow concurrent use across tasks.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// The loaded model handle. Opaque to the cache.
    type Model: Send + Sync + 'static;

    /// The tokenizer handle, loaded and released together with the model.
    type Tokenizer: Send + Sync + 'static;

    /// Materializes the model and tokenizer stored at `path`.
    ///
    /// # Errors
    /// Returns a `LoadError` if either handle cannot be produced.
    async fn load(&self, path: &str) -> Result<(Self::Model, Self::Tokenizer), LoadError>;

    /// Releases a previously loaded pair.
    ///
    /// The default implementation just drops the handles. Runtimes that keep
    /// allocator state outside the handles (device buffer pools, scratch
    /// memory) can override this to clear it after the drop.
    async fn unload(&self, model: Arc<Self::Model>, tokenizer: Arc<Self::Tokenizer>) {
        drop(model);
        drop(tokenizer);
    }
}
