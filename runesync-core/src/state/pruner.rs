//! Periodic removal of stale collection entries.
//!
//! A [`Pruner`] removes every key whose last modification is older than the
//! configured maximum age. Passes can be run by hand ([`Pruner::prune`]) or
//! on a tokio interval ([`Pruner::start`]).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use super::collection::StateCollection;
use crate::config::PrunerConfig;

/// Called once for every pruned key with its last value.
pub type PruneCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

pub struct Pruner {
    collection: StateCollection,
    config: PrunerConfig,
    on_prune: Option<PruneCallback>,
}

impl Pruner {
    pub fn new(collection: StateCollection, config: PrunerConfig) -> Self {
        Self {
            collection,
            config,
            on_prune: None,
        }
    }

    /// Set the per-key callback. A panic inside it is logged and the pass
    /// continues.
    pub fn on_prune<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.on_prune = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &PrunerConfig {
        &self.config
    }

    /// Run one pass now. Returns the number of keys removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    /// Run one pass as if the current time were `now`.
    pub fn prune_at(&self, now: Instant) -> usize {
        let removed = self.collection.prune_at(now, self.config.max_age());

        if let Some(callback) = &self.on_prune {
            for (key, value) in &removed {
                if catch_unwind(AssertUnwindSafe(|| callback(key, value))).is_err() {
                    error!(
                        component_id = %self.collection.component_id(),
                        %key,
                        "prune callback panicked"
                    );
                }
            }
        }

        removed.len()
    }

    /// Spawn the interval loop on the current tokio runtime.
    ///
    /// The first pass runs one full interval after the call.
    pub fn start(self) -> PrunerHandle {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let interval = self.config.interval();
        let component_id = self.collection.component_id().to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(%component_id, ?interval, "pruner started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let count = self.prune();
                        if count > 0 {
                            debug!(%component_id, count, "prune pass");
                        }
                    }
                }
            }

            debug!(%component_id, "pruner stopped");
        });

        PrunerHandle {
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }
}

/// Controls a running pruner loop.
///
/// Dropping the handle signals the loop to stop without waiting for it.
pub struct PrunerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PrunerHandle {
    /// Stop the loop and wait until its task has exited.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!("pruner task panicked");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PrunerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> PrunerConfig {
        PrunerConfig::new(Duration::from_secs(1), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn manual_pass_removes_only_stale_keys() {
        let collection = StateCollection::new("c");
        collection.add_value("a", json!(1));
        let pruner = Pruner::new(collection.clone(), config());

        let start = Instant::now();
        assert_eq!(pruner.prune_at(start + Duration::from_secs(10)), 0);
        assert_eq!(pruner.prune_at(start + Duration::from_secs(11)), 1);
        assert!(collection.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_does_not_stop_pass() {
        let collection = StateCollection::new("c");
        collection.add_value("a", json!(1));
        collection.add_value("b", json!(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let pruner = {
            let calls = calls.clone();
            Pruner::new(collection.clone(), config()).on_prune(move |key, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                if key == "a" {
                    panic!("callback failure");
                }
            })
        };

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(pruner.prune(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_prunes_on_interval_and_stops() {
        let collection = StateCollection::new("c");
        collection.add_value("a", json!(1));
        let handle = Pruner::new(collection.clone(), config()).start();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert!(collection.contains_key("a"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!collection.contains_key("a"));

        handle.stop().await;
    }
}
