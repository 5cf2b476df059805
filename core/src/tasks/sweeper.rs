/// Periodic age sweep
use crate::cache::MessageCache;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Runs [`MessageCache::evict_expired`] every period until stopped or dropped
pub struct EvictionSweeper {
    handle: Option<JoinHandle<()>>,
}

impl EvictionSweeper {
    /// Must be called from within a `LocalSet`
    pub fn start(cache: Rc<RefCell<MessageCache>>, period: Duration) -> Self {
        // tokio intervals reject a zero period
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::task::spawn_local(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                // Each sweep runs to completion before yielding back to the loop
                match cache.try_borrow_mut() {
                    Ok(mut cache) => {
                        let evicted = cache.evict_expired();
                        debug!("Sweep finished, {} messages evicted", evicted);
                    }
                    Err(_) => warn!("Cache busy during sweep tick, skipping"),
                }
            }
        });

        info!("Eviction sweeper started (every {:?})", period);
        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Eviction sweeper stopped");
        }
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
