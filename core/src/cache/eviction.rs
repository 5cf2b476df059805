/// Eviction and trimming: per-conversation cap, global cap, age sweep
use super::MessageCache;
use crate::events::CacheEvent;
use crate::record::{MessageStatus, SharedMessage};
use tracing::{debug, info};

impl MessageCache {
    /// Drop the oldest records of a conversation beyond `max_conversation_size`
    pub(crate) fn enforce_conversation_cap(&mut self, conversation_id: &str) -> usize {
        let max = self.config.max_conversation_size;
        let Some(bucket) = self.buckets.get_mut(conversation_id) else {
            return 0;
        };
        let dropped = bucket.trim_to(max);
        if dropped.is_empty() {
            return 0;
        }
        self.forget(conversation_id, &dropped);
        debug!(
            "Trimmed {} messages from {} (cap {})",
            dropped.len(),
            conversation_id,
            max
        );
        dropped.len()
    }

    /// Evict the globally oldest records until the total is within `max_cache_size`
    pub(crate) fn enforce_global_cap(&mut self) -> usize {
        let max = self.config.max_cache_size;
        let mut total = self.len();
        let mut evicted = 0;

        while total > max {
            let oldest_conversation = self
                .buckets
                .iter()
                .filter_map(|(id, bucket)| bucket.oldest().map(|m| (m.created_at(), id)))
                .min()
                .map(|(_, id)| id.clone());
            let Some(conversation_id) = oldest_conversation else {
                break;
            };
            let Some(record) = self
                .buckets
                .get_mut(&conversation_id)
                .and_then(|b| b.pop_oldest())
            else {
                break;
            };
            self.forget(&conversation_id, &[record]);
            total -= 1;
            evicted += 1;
        }

        if evicted > 0 {
            debug!("Evicted {} messages over total cap {}", evicted, max);
        }
        evicted
    }

    /// Age sweep: drop records not updated within `max_age`, and stale profiles.
    ///
    /// Records still `sending` are kept regardless of age; dropping them would
    /// lose a message that is waiting for confirmation.
    pub fn evict_expired(&mut self) -> usize {
        let now = self.now_ms();
        let max_age = i64::try_from(self.config.max_age_ms).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(max_age);

        let mut expired: Vec<(String, Vec<SharedMessage>)> = Vec::new();
        for (conversation_id, bucket) in self.buckets.iter_mut() {
            let removed = bucket.retain_or_collect(|m| {
                m.status() == MessageStatus::Sending || m.updated_at() >= cutoff
            });
            if !removed.is_empty() {
                expired.push((conversation_id.clone(), removed));
            }
        }

        let mut count = 0;
        for (conversation_id, removed) in &expired {
            self.forget(conversation_id, removed);
            count += removed.len();
        }
        let profiles = self.profiles.expire_before(cutoff);

        if count > 0 || profiles > 0 {
            info!(
                "Age sweep evicted {} messages and {} profiles",
                count, profiles
            );
        }
        count
    }

    /// Unregister records already taken out of `conversation_id`'s bucket
    fn forget(&mut self, conversation_id: &str, removed: &[SharedMessage]) {
        for record in removed {
            self.index.unregister(record);
        }
        if self
            .buckets
            .get(conversation_id)
            .is_some_and(|b| b.is_empty())
        {
            self.buckets.remove(conversation_id);
        }
        self.metrics.record_evictions(removed.len());
        self.emit(CacheEvent::MessagesEvicted {
            conversation_id: conversation_id.to_string(),
            count: removed.len(),
        });
    }
}
