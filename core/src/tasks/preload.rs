/// Fire-and-forget history preload
use crate::cache::MessageCache;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Transport side of a history request
#[async_trait(?Send)]
pub trait HistorySource {
    /// Raw message payloads for a conversation, in any order
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Value>>;
}

/// Request a conversation's history in the background.
///
/// The result is merged in one synchronous `bulk_load` step when it arrives,
/// fully sorted if the conversation was empty. Late or repeated results merge
/// idempotently, so there is no cancellation. Resolves to the number of
/// records merged (0 on failure). Must be called from within a `LocalSet`.
pub fn spawn_preload<S>(
    cache: Rc<RefCell<MessageCache>>,
    source: Rc<S>,
    conversation_id: String,
) -> JoinHandle<usize>
where
    S: HistorySource + ?Sized + 'static,
{
    tokio::task::spawn_local(async move {
        let raws = match source.fetch_history(&conversation_id).await {
            Ok(raws) => raws,
            Err(e) => {
                warn!("History preload for {} failed: {}", conversation_id, e);
                return 0;
            }
        };

        let mut cache = cache.borrow_mut();
        let first_load = cache.conversation_len(&conversation_id) == 0;
        let merged = cache.bulk_load(raws, first_load).len();
        info!(
            "Preloaded {} messages for {}{}",
            merged,
            conversation_id,
            if first_load { " (first load)" } else { "" }
        );
        merged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::CacheError;
    use serde_json::json;
    use tokio::task::LocalSet;

    struct FixedHistory(Vec<Value>);

    #[async_trait(?Send)]
    impl HistorySource for FixedHistory {
        async fn fetch_history(&self, _conversation_id: &str) -> Result<Vec<Value>> {
            tokio::task::yield_now().await;
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    #[async_trait(?Send)]
    impl HistorySource for Unreachable {
        async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Value>> {
            Err(CacheError::Preload(format!("{} unreachable", conversation_id)))
        }
    }

    #[tokio::test]
    async fn test_preload_merges_history() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let cache = Rc::new(RefCell::new(MessageCache::new(CacheConfig::default())));
                let source = Rc::new(FixedHistory(vec![
                    json!({"id": "s2", "conversationId": "room", "text": "b", "createdAt": 1_699_000_002_000i64}),
                    json!({"id": "s1", "conversationId": "room", "text": "a", "createdAt": 1_699_000_001_000i64}),
                ]));

                let merged = spawn_preload(cache.clone(), source.clone(), "room".to_string())
                    .await
                    .unwrap();
                assert_eq!(merged, 2);

                // A late duplicate preload changes nothing
                spawn_preload(cache.clone(), source, "room".to_string())
                    .await
                    .unwrap();

                let cache = cache.borrow();
                assert_eq!(cache.conversation_len("room"), 2);
                let newest = cache.get_slice("room", 1, 0);
                assert_eq!(newest[0].server_id().as_deref(), Some("s2"));
                assert!(cache.consistency_violations().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_preload_failure_is_logged_not_propagated() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let cache = Rc::new(RefCell::new(MessageCache::new(CacheConfig::default())));
                let merged = spawn_preload(cache.clone(), Rc::new(Unreachable), "room".to_string())
                    .await
                    .unwrap();
                assert_eq!(merged, 0);
                assert!(cache.borrow().is_empty());
            })
            .await;
    }
}
