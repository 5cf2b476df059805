/// Reconciliation: merge server-authoritative records into the cache
use super::MessageCache;
use crate::events::CacheEvent;
use crate::normalizer::InboundFields;
use crate::record::{MessageRecord, MessageStatus, SharedMessage};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Status after the server reports `server`.
///
/// A server failure always wins. Otherwise the server status is taken unless
/// it is older than a status the server already confirmed for this record.
pub(super) fn resolve_server_status(
    record: &MessageRecord,
    server: MessageStatus,
) -> MessageStatus {
    if server == MessageStatus::Failed {
        return MessageStatus::Failed;
    }
    if let Some(confirmed) = record.confirmed_status() {
        if let (Some(c), Some(s)) = (confirmed.rank(), server.rank()) {
            if c > s {
                return confirmed;
            }
        }
    }
    server
}

impl MessageCache {
    /// Merge one server-delivered record.
    ///
    /// A cached match (by correlation id, then server id) is updated in place so
    /// every holder of its handle sees the confirmed state. Otherwise the record
    /// is new and gets inserted. Applying the same record twice is a no-op.
    pub fn reconcile(&mut self, server_record: &Value) -> SharedMessage {
        let fields = InboundFields::extract(server_record);
        match self.find_existing(&fields) {
            Some(existing) => {
                self.merge_server_fields(&existing, fields);
                self.metrics.record_reconciliation(false);
                existing
            }
            None => {
                let record = self.normalize_fields(fields, MessageStatus::Sent);
                debug!(
                    "Reconcile inserting new message {} in {}",
                    record.correlation_id, record.conversation_id
                );
                self.metrics.record_reconciliation(true);
                self.insert_new(record)
            }
        }
    }

    /// Ingest a batch (history load, reconnect catch-up).
    ///
    /// Known records are reconciled; new ones are grouped per conversation and
    /// inserted in one pass, fully sorted when `should_sort` is set. Both caps
    /// are enforced afterwards. Returns handles in input order.
    pub fn bulk_load(&mut self, raws: Vec<Value>, should_sort: bool) -> Vec<SharedMessage> {
        let mut out: Vec<SharedMessage> = Vec::with_capacity(raws.len());
        let mut pending: HashMap<String, Vec<SharedMessage>> = HashMap::new();
        let mut merged = 0usize;

        for raw in &raws {
            let fields = InboundFields::extract(raw);
            if let Some(existing) = self.find_existing(&fields) {
                if let Some(displaced) = self.merge_server_fields(&existing, fields) {
                    // The displaced record may still be waiting in this batch
                    for handle in out.iter_mut().filter(|m| m.ptr_eq(&displaced)) {
                        *handle = existing.clone();
                    }
                    if let Some(batch) = pending.get_mut(&displaced.conversation_id()) {
                        batch.retain(|m| !m.ptr_eq(&displaced));
                    }
                }
                self.metrics.record_reconciliation(false);
                merged += 1;
                out.push(existing);
                continue;
            }

            let record = SharedMessage::new(self.normalize_fields(fields, MessageStatus::Sent));
            // Indexed right away so a duplicate later in the batch merges instead
            self.index.register(&record);
            pending
                .entry(record.conversation_id())
                .or_default()
                .push(record.clone());
            out.push(record);
        }

        let mut added = 0usize;
        for (conversation_id, records) in pending {
            for record in &records {
                self.emit(CacheEvent::MessageAdded {
                    conversation_id: conversation_id.clone(),
                    correlation_id: record.correlation_id(),
                });
            }
            added += self
                .buckets
                .entry(conversation_id.clone())
                .or_default()
                .bulk_insert(records, should_sort);
            self.enforce_conversation_cap(&conversation_id);
        }
        self.enforce_global_cap();

        info!(
            "Bulk loaded {} messages ({} new, {} merged)",
            raws.len(),
            added,
            merged
        );
        out
    }

    fn find_existing(&self, fields: &InboundFields) -> Option<SharedMessage> {
        fields
            .correlation_id
            .as_deref()
            .and_then(|id| self.index.lookup_correlation(id))
            .or_else(|| {
                fields
                    .server_id
                    .as_deref()
                    .and_then(|id| self.index.lookup_server(id))
            })
    }

    /// In-place merge of authoritative fields into a cached record.
    ///
    /// If another cached record already holds the incoming server id (an
    /// inbound echo of our own send that beat the ack), that record is dropped
    /// and `record` survives. Returns the dropped record.
    fn merge_server_fields(
        &mut self,
        record: &SharedMessage,
        fields: InboundFields,
    ) -> Option<SharedMessage> {
        let server_status = fields.effective_status(MessageStatus::Sent);
        let now = self.now_ms();

        let displaced = fields
            .server_id
            .as_deref()
            .and_then(|id| self.index.lookup_server(id))
            .filter(|other| !other.ptr_eq(record));
        if let Some(other) = &displaced {
            debug!(
                "Dropping duplicate {} in favour of {}",
                other.correlation_id(),
                record.correlation_id()
            );
            self.remove_record(other);
            self.emit(CacheEvent::MessagesEvicted {
                conversation_id: other.conversation_id(),
                count: 1,
            });
        }

        let old_server_id = record.server_id();
        if let Some(new_id) = fields.server_id.as_deref() {
            if old_server_id.as_deref() != Some(new_id) {
                if let Some(old_id) = old_server_id.as_deref() {
                    self.index.unregister_server_id(old_id, record);
                }
            }
        }

        let (before, after) = record.update(|r| {
            let before = r.status;
            if let Some(server_id) = fields.server_id {
                r.server_id = Some(server_id);
            }
            if let Some(payload) = fields.payload {
                r.payload = payload;
            }
            if r.sender_id.is_none() {
                r.sender_id = fields.sender_id;
            }
            r.merge_attributes(fields.attributes);
            r.status = resolve_server_status(r, server_status);
            r.previous_status = None;
            r.synchronized = true;
            r.updated_at = now;
            (before, r.status)
        });
        self.index.register(record);

        debug!(
            "Reconciled {} ({} -> {})",
            record.correlation_id(),
            before,
            after
        );
        self.emit_updated(record);
        displaced
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::tests::cache_with;
    use crate::record::MessageStatus;
    use serde_json::{json, Map};

    #[test]
    fn test_reconcile_own_send() {
        let (mut cache, _clock) = cache_with(10);
        let local = cache.send_local("room", json!("hi"));
        let cid = local.correlation_id();

        let merged = cache.reconcile(&json!({
            "correlationId": cid, "serverId": "s1", "status": "sent"
        }));
        assert!(merged.ptr_eq(&local));
        assert!(cache.get_message(&cid).unwrap().ptr_eq(&cache.get_message("s1").unwrap()));
        assert_eq!(local.status(), MessageStatus::Sent);
        assert!(local.get().is_synchronized());
        assert_eq!(local.get().previous_status(), None);
        // Payload untouched when the server sends none
        assert_eq!(local.get().payload(), &json!("hi"));
        assert_eq!(cache.conversation_len("room"), 1);
    }

    #[test]
    fn test_reconcile_replaces_payload() {
        let (mut cache, _clock) = cache_with(10);
        let local = cache.send_local("room", json!("see https://x.y"));
        cache.reconcile(&json!({
            "correlationId": local.correlation_id(),
            "id": "s1",
            "content": {"text": "see https://x.y", "preview": "X"},
        }));
        assert_eq!(local.get().payload()["preview"], "X");
    }

    #[test]
    fn test_server_failure_overrides_optimism() {
        let (mut cache, _clock) = cache_with(10);
        let local = cache.send_local("room", json!("hi"));
        let cid = local.correlation_id();
        cache.apply_optimistic(&cid, MessageStatus::Sent, Map::new());
        cache.apply_optimistic(&cid, MessageStatus::Delivered, Map::new());

        cache.reconcile(&json!({"correlationId": cid, "status": "failed"}));
        assert_eq!(local.status(), MessageStatus::Failed);
        assert_eq!(local.get().previous_status(), None);
    }

    #[test]
    fn test_reconcile_idempotent() {
        let (mut cache, _clock) = cache_with(10);
        let local = cache.send_local("room", json!("hi"));
        let server = json!({
            "correlationId": local.correlation_id(), "id": "s1", "status": "delivered"
        });

        cache.reconcile(&server);
        let once = local.snapshot();
        cache.reconcile(&server);
        assert_eq!(local.snapshot(), once);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_inbound_message_inserted_once() {
        let (mut cache, _clock) = cache_with(10);
        let inbound = json!({
            "id": "s9", "conversationId": "room", "senderId": "bob",
            "text": "yo", "createdAt": 1_699_000_000_000i64
        });
        let first = cache.reconcile(&inbound);
        let second = cache.reconcile(&inbound);
        assert!(first.ptr_eq(&second));
        assert_eq!(cache.conversation_len("room"), 1);

        let m = cache.metrics();
        assert_eq!(m.reconciliations, 2);
        assert_eq!(m.reconcile_inserts, 1);
    }

    #[test]
    fn test_bulk_load_dedups_and_merges() {
        let (mut cache, _clock) = cache_with(10);
        let local = cache.send_local("room", json!("mine"));

        let batch = vec![
            json!({"id": "s3", "conversationId": "room", "text": "c", "createdAt": 1_699_000_003_000i64}),
            json!({"id": "s1", "conversationId": "room", "text": "a", "createdAt": 1_699_000_001_000i64}),
            json!({"id": "s1", "conversationId": "room", "text": "a", "createdAt": 1_699_000_001_000i64}),
            json!({"correlationId": local.correlation_id(), "id": "s4", "status": "delivered"}),
            json!({"id": "o1", "conversationId": "other", "text": "z"}),
        ];
        let out = cache.bulk_load(batch, true);

        assert_eq!(out.len(), 5);
        assert!(out[1].ptr_eq(&out[2]));
        assert!(out[3].ptr_eq(&local));
        assert_eq!(local.status(), MessageStatus::Delivered);
        assert_eq!(cache.conversation_len("room"), 3);
        assert_eq!(cache.conversation_len("other"), 1);

        let ids: Vec<Option<String>> = cache
            .get_slice("room", 10, 0)
            .iter()
            .map(|m| m.server_id())
            .collect();
        assert_eq!(
            ids,
            vec![Some("s4".to_string()), Some("s3".to_string()), Some("s1".to_string())]
        );
        assert!(cache.consistency_violations().is_empty());
    }

    #[test]
    fn test_inbound_echo_before_ack_keeps_one_record() {
        let (mut cache, _clock) = cache_with(10);
        let local = cache.send_local("room", json!("hi"));
        let cid = local.correlation_id();

        // Our own message comes back on the inbound channel first
        let echo = cache.reconcile(&json!({"id": "s1", "conversationId": "room", "text": "hi"}));
        assert!(!echo.ptr_eq(&local));
        assert_eq!(cache.conversation_len("room"), 2);

        let merged = cache.reconcile(&json!({"correlationId": cid, "id": "s1", "status": "sent"}));
        assert!(merged.ptr_eq(&local));
        assert_eq!(cache.conversation_len("room"), 1);
        assert!(cache.get_message("s1").unwrap().ptr_eq(&local));
        assert!(cache.get_message(&echo.correlation_id()).is_none());
        assert!(cache.consistency_violations().is_empty());
    }

    #[test]
    fn test_bulk_load_echo_in_same_batch() {
        let (mut cache, _clock) = cache_with(10);
        let local = cache.send_local("room", json!("hi"));

        let out = cache.bulk_load(
            vec![
                json!({"id": "s1", "conversationId": "room", "text": "hi"}),
                json!({"correlationId": local.correlation_id(), "id": "s1"}),
            ],
            true,
        );
        assert!(out[0].ptr_eq(&local));
        assert!(out[1].ptr_eq(&local));
        assert_eq!(cache.conversation_len("room"), 1);
        assert!(cache.consistency_violations().is_empty());
    }

    #[test]
    fn test_server_sending_status_is_idempotent() {
        let (mut cache, _clock) = cache_with(10);
        let raw = json!({"id": "s7", "conversationId": "room", "status": "sending"});
        let first = cache.reconcile(&raw);
        let second = cache.reconcile(&raw);
        assert!(first.ptr_eq(&second));
        assert_eq!(first.status(), MessageStatus::Sent);
        assert_eq!(cache.conversation_len("room"), 1);
    }
}
