/// Optimistic status engine: local status changes ahead of the server
use super::MessageCache;
use crate::normalizer::InboundFields;
use crate::record::{MessageStatus, SharedMessage};
use serde_json::{Map, Value};
use tracing::debug;

impl MessageCache {
    /// Advance a record's status before the server confirms it.
    ///
    /// Remembers the current status as `previous_status` for rollback. Returns
    /// `None` when the identifier is not cached. A transition that would move
    /// backwards (or out of `failed`) leaves the record untouched.
    pub fn apply_optimistic(
        &mut self,
        identifier: &str,
        new_status: MessageStatus,
        extra_fields: Map<String, Value>,
    ) -> Option<SharedMessage> {
        let Some(record) = self.index.lookup(identifier) else {
            self.metrics.record_lookup(false);
            debug!("Optimistic update for unknown message {}", identifier);
            return None;
        };
        self.metrics.record_lookup(true);

        let current = record.status();
        if !current.can_advance_to(new_status) {
            debug!(
                "Ignoring optimistic {} -> {} for {}",
                current, new_status, identifier
            );
            return Some(record);
        }

        let now = self.now_ms();
        record.update(|r| {
            r.previous_status = Some(r.status);
            r.status = new_status;
            r.merge_attributes(extra_fields);
            r.updated_at = now;
        });
        self.metrics.record_optimistic_update();
        debug!("Optimistic {} -> {} for {}", current, new_status, identifier);
        self.emit_updated(&record);
        Some(record)
    }

    /// Undo the last optimistic mutation. `None` when nothing is pending.
    pub fn rollback(&mut self, identifier: &str) -> Option<SharedMessage> {
        let record = self.index.lookup(identifier)?;
        let now = self.now_ms();
        let restored = record.update(|r| {
            let previous = r.previous_status.take()?;
            r.status = previous;
            r.updated_at = now;
            Some(previous)
        })?;
        self.metrics.record_rollback();
        debug!("Rolled back {} to {}", identifier, restored);
        self.emit_updated(&record);
        Some(record)
    }

    /// Transport could not deliver an in-flight send
    pub fn mark_failed(&mut self, identifier: &str) -> Option<SharedMessage> {
        let record = self.index.lookup(identifier)?;
        if !record.status().can_advance_to(MessageStatus::Failed) {
            debug!("Cannot fail {} from {}", identifier, record.status());
            return Some(record);
        }
        let now = self.now_ms();
        record.update(|r| {
            r.status = MessageStatus::Failed;
            r.previous_status = None;
            r.updated_at = now;
        });
        debug!("Send failed for {}", identifier);
        self.emit_updated(&record);
        Some(record)
    }

    /// Re-send a failed message as a new record with a new correlation id.
    ///
    /// The failed record is removed. `None` when the identifier is unknown or
    /// the record has not failed.
    pub fn retry(&mut self, identifier: &str) -> Option<SharedMessage> {
        let failed = self.index.lookup(identifier)?;
        if failed.status() != MessageStatus::Failed {
            debug!("Retry refused for {} in state {}", identifier, failed.status());
            return None;
        }

        let fields = {
            let r = failed.get();
            InboundFields {
                conversation_id: Some(r.conversation_id.clone()),
                sender_id: r.sender_id.clone(),
                payload: Some(r.payload.clone()),
                attributes: r.attributes.clone(),
                ..InboundFields::default()
            }
        };
        self.remove_record(&failed);

        let record = self.normalize_fields(fields, MessageStatus::Sending);
        debug!("Retrying {} as {}", identifier, record.correlation_id);
        Some(self.insert_new(record))
    }

    /// Apply a delivery/read acknowledgement from the transport.
    ///
    /// A record already marked `failed` is left as is; only `retry` moves a
    /// failed send forward.
    pub fn acknowledge(&mut self, identifier: &str, status: MessageStatus) -> Option<SharedMessage> {
        let Some(record) = self.index.lookup(identifier) else {
            self.metrics.record_lookup(false);
            debug!("Ack for unknown message {}", identifier);
            return None;
        };
        self.metrics.record_lookup(true);

        if record.status() == MessageStatus::Failed {
            debug!("Ignoring {} ack for failed message {}", status, identifier);
            return Some(record);
        }

        let now = self.now_ms();
        record.update(|r| {
            r.status = super::reconcile::resolve_server_status(r, status);
            r.previous_status = None;
            r.synchronized = true;
            r.updated_at = now;
        });
        self.emit_updated(&record);
        Some(record)
    }
}
