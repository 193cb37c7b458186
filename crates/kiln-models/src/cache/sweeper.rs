//! Periodic background sweep that evicts idle models.

use std::sync::Arc;
use std::time::Duration;

use kiln_abstraction::ModelLoader;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::cache::ResidentModelCache;

/// Supervised handle to the idle-eviction task.
///
/// The embedding application keeps this handle and shuts the task down
/// explicitly at process exit; there is no fire-and-forget spawn to hunt
/// down later. Cancellation is only observed between sweeps, never while
/// the cache lock is held, so shutdown cannot leave a half-evicted entry.
pub struct CacheSweeper {
    handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CacheSweeper {
    /// Spawns the sweep loop on the current runtime.
    ///
    /// Every `interval`, one sweep runs `release_idle` on the cache. The
    /// sweep body is infallible, so a quiet iteration can never stop the
    /// loop.
    #[must_use]
    pub fn spawn<L>(cache: Arc<ResidentModelCache<L>>, interval: Duration) -> Self
    where
        L: ModelLoader + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if cache.release_idle().await {
                            debug!("Sweep evicted an idle model");
                        } else {
                            trace!("Sweep found nothing to evict");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache sweeper shutting down");
                        break;
                    }
                }
            }
        });

        Self { handle, shutdown_tx }
    }

    /// Whether the sweep task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}
