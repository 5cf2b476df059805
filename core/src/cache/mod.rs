/// Client-resident message cache
///
/// Owns the conversation buckets, the identifier index, the profile cache and
/// the metrics. Every public operation runs to completion synchronously; hosts
/// drive it from a single-threaded event loop (see [`crate::session`]).
mod eviction;
mod optimistic;
mod reconcile;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::conversation_store::ConversationBucket;
use crate::events::CacheEvent;
use crate::identifier_index::IdentifierIndex;
use crate::metrics::{CacheMetrics, MetricsRecorder};
use crate::normalizer::{self, InboundFields};
use crate::profile_store::{CachedProfile, ProfileStore};
use crate::record::{MessageRecord, MessageStatus, SharedMessage};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct MessageCache {
    config: CacheConfig,
    clock: Box<dyn Clock>,
    buckets: HashMap<String, ConversationBucket>,
    index: IdentifierIndex,
    profiles: ProfileStore,
    metrics: MetricsRecorder,
    events: broadcast::Sender<CacheEvent>,
}

impl MessageCache {
    /// Create a cache on the system clock
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock(mut config: CacheConfig, clock: impl Clock + 'static) -> Self {
        config.max_conversation_size = config.max_conversation_size.max(1);
        config.max_cache_size = config.max_cache_size.max(config.max_conversation_size);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        debug!(
            "Message cache created (conversation cap {}, total cap {}, max age {}ms)",
            config.max_conversation_size, config.max_cache_size, config.max_age_ms
        );

        Self {
            config,
            clock: Box::new(clock),
            buckets: HashMap::new(),
            index: IdentifierIndex::new(),
            profiles: ProfileStore::new(),
            metrics: MetricsRecorder::new(),
            events,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Receive change events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot()
    }

    /// Queue an outgoing message: status `sending`, fresh correlation id
    pub fn send_local(&mut self, conversation_id: &str, payload: Value) -> SharedMessage {
        let fields = InboundFields {
            conversation_id: Some(conversation_id.to_string()),
            payload: Some(payload),
            ..InboundFields::default()
        };
        let record = self.normalize_fields(fields, MessageStatus::Sending);
        debug!(
            "Queued local message {} in {}",
            record.correlation_id, record.conversation_id
        );
        self.insert_new(record)
    }

    /// Look up by server id, then by correlation id
    pub fn get_message(&self, identifier: &str) -> Option<SharedMessage> {
        let found = self.index.lookup(identifier);
        self.metrics.record_lookup(found.is_some());
        found
    }

    /// Newest-first page of a conversation; empty for unknown conversations
    pub fn get_slice(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
    ) -> Vec<SharedMessage> {
        self.buckets
            .get(conversation_id)
            .map(|b| b.get_slice(limit, offset))
            .unwrap_or_default()
    }

    pub fn conversation_len(&self, conversation_id: &str) -> usize {
        self.buckets.get(conversation_id).map_or(0, ConversationBucket::len)
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.buckets.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total cached records across all conversations
    pub fn len(&self) -> usize {
        self.buckets.values().map(ConversationBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn put_profile(&mut self, user_id: &str, profile: Value) {
        let now = self.now_ms();
        self.profiles.put(user_id, profile, now);
    }

    pub fn get_profile(&self, user_id: &str) -> Option<&CachedProfile> {
        self.profiles.get(user_id)
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Drop one conversation from every index; returns how many records went
    pub fn clear_conversation(&mut self, conversation_id: &str) -> usize {
        let Some(mut bucket) = self.buckets.remove(conversation_id) else {
            return 0;
        };
        let removed = bucket.drain_all();
        for record in &removed {
            self.index.unregister(record);
        }
        info!("Cleared conversation {} ({} messages)", conversation_id, removed.len());
        self.emit(CacheEvent::ConversationCleared {
            conversation_id: conversation_id.to_string(),
        });
        removed.len()
    }

    /// Session teardown: empty every map
    pub fn clear_all(&mut self) {
        let count = self.len();
        self.buckets.clear();
        self.index.clear();
        self.profiles.clear();
        info!("Cleared message cache ({} messages)", count);
        self.emit(CacheEvent::CacheCleared);
    }

    /// Describe every broken structural invariant; empty when consistent
    pub fn consistency_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut total = 0;

        for (conversation_id, bucket) in &self.buckets {
            total += bucket.len();
            if !bucket.is_ordered() {
                problems.push(format!("{}: bucket out of order", conversation_id));
            }
            if bucket.len() > self.config.max_conversation_size {
                problems.push(format!(
                    "{}: {} records exceeds cap {}",
                    conversation_id,
                    bucket.len(),
                    self.config.max_conversation_size
                ));
            }
            if bucket.is_empty() {
                problems.push(format!("{}: empty bucket kept", conversation_id));
            }
            for record in bucket.iter() {
                let r = record.get();
                if r.conversation_id() != conversation_id {
                    problems.push(format!("{}: stored in wrong bucket", r.correlation_id()));
                }
                let by_corr = self.index.lookup_correlation(r.correlation_id());
                if !by_corr.is_some_and(|m| m.ptr_eq(record)) {
                    problems.push(format!("{}: not indexed by correlation id", r.correlation_id()));
                }
                if let Some(server_id) = r.server_id() {
                    let by_server = self.index.lookup_server(server_id);
                    if !by_server.is_some_and(|m| m.ptr_eq(record)) {
                        problems.push(format!("{}: not indexed by server id", server_id));
                    }
                }
            }
        }

        if total != self.index.len() {
            problems.push(format!(
                "index holds {} records but buckets hold {}",
                self.index.len(),
                total
            ));
        }
        problems
    }

    fn normalize_fields(&self, fields: InboundFields, status_hint: MessageStatus) -> MessageRecord {
        let normalized = normalizer::from_fields(fields, status_hint, self.now_ms());
        if normalized.is_malformed() {
            self.metrics
                .record_malformed(&normalized.record.correlation_id, &normalized.defaulted);
        }
        normalized.record
    }

    /// Register and place a brand-new record, then enforce both caps
    fn insert_new(&mut self, record: MessageRecord) -> SharedMessage {
        let conversation_id = record.conversation_id.clone();
        let shared = SharedMessage::new(record);
        self.index.register(&shared);
        self.buckets
            .entry(conversation_id.clone())
            .or_default()
            .insert_chronologically(shared.clone());
        self.emit(CacheEvent::MessageAdded {
            conversation_id: conversation_id.clone(),
            correlation_id: shared.correlation_id(),
        });

        self.enforce_conversation_cap(&conversation_id);
        self.enforce_global_cap();
        shared
    }

    /// Take a record out of its bucket and every index entry
    fn remove_record(&mut self, record: &SharedMessage) {
        let conversation_id = record.conversation_id();
        if let Some(bucket) = self.buckets.get_mut(&conversation_id) {
            bucket.remove(record);
            if bucket.is_empty() {
                self.buckets.remove(&conversation_id);
            }
        }
        self.index.unregister(record);
    }

    fn emit_updated(&self, record: &SharedMessage) {
        let (conversation_id, correlation_id, status) = {
            let r = record.get();
            (r.conversation_id.clone(), r.correlation_id.clone(), r.status)
        };
        self.emit(CacheEvent::MessageUpdated {
            conversation_id,
            correlation_id,
            status,
        });
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
