/// Identifier index: server id and correlation id to the same shared record
use crate::record::SharedMessage;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct IdentifierIndex {
    by_server_id: HashMap<String, SharedMessage>,
    by_correlation_id: HashMap<String, SharedMessage>,
}

impl IdentifierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under every identifier the record currently has
    pub fn register(&mut self, record: &SharedMessage) {
        let (server_id, correlation_id) = {
            let r = record.get();
            (r.server_id().map(str::to_string), r.correlation_id().to_string())
        };
        if let Some(server_id) = server_id {
            self.by_server_id.insert(server_id, record.clone());
        }
        self.by_correlation_id.insert(correlation_id, record.clone());
    }

    /// Server ids win over correlation ids
    pub fn lookup(&self, identifier: &str) -> Option<SharedMessage> {
        self.by_server_id
            .get(identifier)
            .or_else(|| self.by_correlation_id.get(identifier))
            .cloned()
    }

    pub fn lookup_correlation(&self, correlation_id: &str) -> Option<SharedMessage> {
        self.by_correlation_id.get(correlation_id).cloned()
    }

    pub fn lookup_server(&self, server_id: &str) -> Option<SharedMessage> {
        self.by_server_id.get(server_id).cloned()
    }

    /// Remove a server-id entry only if it belongs to `record`
    pub fn unregister_server_id(&mut self, server_id: &str, record: &SharedMessage) {
        if self
            .by_server_id
            .get(server_id)
            .is_some_and(|m| m.ptr_eq(record))
        {
            self.by_server_id.remove(server_id);
        }
    }

    /// Remove both entries for `record`. Entries that point at a different
    /// record under the same key are left alone.
    pub fn unregister(&mut self, record: &SharedMessage) {
        let (server_id, correlation_id) = {
            let r = record.get();
            (r.server_id().map(str::to_string), r.correlation_id().to_string())
        };
        if let Some(server_id) = server_id {
            self.unregister_server_id(&server_id, record);
        }
        if self
            .by_correlation_id
            .get(&correlation_id)
            .is_some_and(|m| m.ptr_eq(record))
        {
            self.by_correlation_id.remove(&correlation_id);
        }
    }

    /// Whether `record` is reachable through any key
    pub fn contains(&self, record: &SharedMessage) -> bool {
        self.by_correlation_id.values().any(|m| m.ptr_eq(record))
            || self.by_server_id.values().any(|m| m.ptr_eq(record))
    }

    /// Number of distinct records (every record has a correlation id)
    pub fn len(&self) -> usize {
        self.by_correlation_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_correlation_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_server_id.clear();
        self.by_correlation_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use crate::record::MessageStatus;
    use serde_json::json;

    fn shared(raw: serde_json::Value, status: MessageStatus) -> SharedMessage {
        SharedMessage::new(normalize(&raw, status, 1_700_000_000_000).record)
    }

    #[test]
    fn test_register_both_keys_same_reference() {
        let mut index = IdentifierIndex::new();
        let m = shared(json!({"id": "s1", "correlationId": "c1", "conversationId": "x", "text": "t"}), MessageStatus::Sent);
        index.register(&m);

        let by_server = index.lookup("s1").unwrap();
        let by_corr = index.lookup("c1").unwrap();
        assert!(by_server.ptr_eq(&by_corr));
        assert!(by_server.ptr_eq(&m));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_lookup_prefers_server_id() {
        let mut index = IdentifierIndex::new();
        let a = shared(json!({"id": "dup", "correlationId": "a", "conversationId": "x"}), MessageStatus::Sent);
        let b = shared(json!({"correlationId": "dup", "conversationId": "x"}), MessageStatus::Sending);
        index.register(&a);
        index.register(&b);
        assert!(index.lookup("dup").unwrap().ptr_eq(&a));
        assert!(index.lookup_correlation("dup").unwrap().ptr_eq(&b));
    }

    #[test]
    fn test_unregister_removes_both() {
        let mut index = IdentifierIndex::new();
        let m = shared(json!({"id": "s1", "correlationId": "c1", "conversationId": "x"}), MessageStatus::Sent);
        index.register(&m);
        index.unregister(&m);
        assert!(index.lookup("s1").is_none());
        assert!(index.lookup("c1").is_none());
        assert!(!index.contains(&m));
        assert!(index.is_empty());
    }

    #[test]
    fn test_unregister_leaves_other_records() {
        let mut index = IdentifierIndex::new();
        let old = shared(json!({"id": "s1", "correlationId": "c-old", "conversationId": "x"}), MessageStatus::Sent);
        let new = shared(json!({"id": "s1", "correlationId": "c-new", "conversationId": "x"}), MessageStatus::Sent);
        index.register(&old);
        index.register(&new);
        index.unregister(&old);
        assert!(index.lookup("s1").unwrap().ptr_eq(&new));
        assert!(index.lookup("c-new").is_some());
    }
}
