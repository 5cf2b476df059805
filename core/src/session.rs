/// Cache session: one cache per client session plus its background sweeper
use crate::cache::MessageCache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::tasks::{spawn_preload, EvictionSweeper, HistorySource};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::task::JoinHandle;
use tracing::info;

/// Owns the cache and its sweep task. The cache handle is passed explicitly
/// to whichever components need it; there is no global instance.
pub struct CacheSession {
    cache: Rc<RefCell<MessageCache>>,
    sweeper: EvictionSweeper,
}

impl CacheSession {
    /// Build a cache from `config` and start sweeping. Call inside a `LocalSet`.
    pub fn start(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_cache(MessageCache::new(config)))
    }

    /// Start a session around an existing cache (e.g. one with a manual clock)
    pub fn with_cache(cache: MessageCache) -> Self {
        let period = cache.config().eviction_interval();
        let cache = Rc::new(RefCell::new(cache));
        let sweeper = EvictionSweeper::start(cache.clone(), period);
        info!("Cache session started");
        Self { cache, sweeper }
    }

    pub fn cache(&self) -> Rc<RefCell<MessageCache>> {
        self.cache.clone()
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Fire-and-forget history request for a conversation
    pub fn preload<S>(&self, source: Rc<S>, conversation_id: &str) -> JoinHandle<usize>
    where
        S: HistorySource + ?Sized + 'static,
    {
        spawn_preload(self.cache.clone(), source, conversation_id.to_string())
    }

    /// Logout/reset: stop the sweeper and empty every map
    pub fn shutdown(mut self) {
        self.sweeper.stop();
        self.cache.borrow_mut().clear_all();
        info!("Cache session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use serde_json::json;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let session = CacheSession::start(CacheConfig::default()).unwrap();
                assert!(session.is_sweeping());

                let cache = session.cache();
                cache.borrow_mut().send_local("room", json!("hi"));
                assert_eq!(cache.borrow().len(), 1);

                session.shutdown();
                assert!(cache.borrow().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_session_rejects_bad_config() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let config = CacheConfig {
                    eviction_interval_ms: 0,
                    ..CacheConfig::default()
                };
                assert!(matches!(
                    CacheSession::start(config),
                    Err(CacheError::Config(_))
                ));
            })
            .await;
    }
}
