/// Canonical message record and its shared handle
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Delivery lifecycle of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Position on the forward path; `Failed` sits outside it
    pub fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Sending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }

    /// Whether `next` is a forward (or same-state) transition from `self`.
    ///
    /// `Failed` is terminal and is reachable only while the send is not yet
    /// delivered.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (None, _) => false,
            (Some(current), None) => current <= 1,
            (Some(current), Some(next)) => next >= current,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sending" | "pending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" | "seen" => Ok(MessageStatus::Read),
            "failed" | "error" | "rejected" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

/// One cached message.
///
/// Fields are only mutated inside the crate; consumers read them through
/// [`SharedMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub(crate) server_id: Option<String>,
    pub(crate) correlation_id: String,
    pub(crate) conversation_id: String,
    pub(crate) sender_id: Option<String>,
    pub(crate) payload: Value,
    pub(crate) attributes: Map<String, Value>,
    pub(crate) status: MessageStatus,
    pub(crate) previous_status: Option<MessageStatus>,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
    pub(crate) synchronized: bool,
}

impl MessageRecord {
    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Extension fields merged in by optimistic updates and reconciliation
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn previous_status(&self) -> Option<MessageStatus> {
        self.previous_status
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Status last confirmed by the server, if any
    pub(crate) fn confirmed_status(&self) -> Option<MessageStatus> {
        if let Some(previous) = self.previous_status {
            self.synchronized.then_some(previous)
        } else {
            self.synchronized.then_some(self.status)
        }
    }

    pub(crate) fn merge_attributes(&mut self, extra: Map<String, Value>) {
        for (key, value) in extra {
            self.attributes.insert(key, value);
        }
    }
}

/// Shared handle to a cached record.
///
/// Every index entry and bucket slot for a message holds a clone of the same
/// handle, so a mutation made through one path is visible through all of them.
#[derive(Clone)]
pub struct SharedMessage(Rc<RefCell<MessageRecord>>);

impl SharedMessage {
    pub(crate) fn new(record: MessageRecord) -> Self {
        Self(Rc::new(RefCell::new(record)))
    }

    /// Borrow the record for reading
    pub fn get(&self) -> Ref<'_, MessageRecord> {
        self.0.borrow()
    }

    /// Owned copy of the current state
    pub fn snapshot(&self) -> MessageRecord {
        self.0.borrow().clone()
    }

    /// Whether both handles refer to the same record
    pub fn ptr_eq(&self, other: &SharedMessage) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn created_at(&self) -> i64 {
        self.0.borrow().created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.0.borrow().updated_at
    }

    pub fn status(&self) -> MessageStatus {
        self.0.borrow().status
    }

    pub fn correlation_id(&self) -> String {
        self.0.borrow().correlation_id.clone()
    }

    pub fn server_id(&self) -> Option<String> {
        self.0.borrow().server_id.clone()
    }

    pub fn conversation_id(&self) -> String {
        self.0.borrow().conversation_id.clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut MessageRecord) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl fmt::Debug for SharedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedMessage").field(&*self.0.borrow()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: MessageStatus) -> MessageRecord {
        MessageRecord {
            server_id: None,
            correlation_id: "c1".to_string(),
            conversation_id: "conv".to_string(),
            sender_id: None,
            payload: Value::Null,
            attributes: Map::new(),
            status,
            previous_status: None,
            created_at: 1,
            updated_at: 1,
            synchronized: false,
        }
    }

    #[test]
    fn test_forward_transitions() {
        use MessageStatus::*;
        assert!(Sending.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Read));
        assert!(Delivered.can_advance_to(Delivered));
        assert!(!Read.can_advance_to(Sent));
        assert!(!Delivered.can_advance_to(Sending));
    }

    #[test]
    fn test_failed_is_terminal() {
        use MessageStatus::*;
        assert!(Sending.can_advance_to(Failed));
        assert!(Sent.can_advance_to(Failed));
        assert!(!Delivered.can_advance_to(Failed));
        for next in [Sending, Sent, Delivered, Read, Failed] {
            assert!(!Failed.can_advance_to(next));
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Delivered".parse::<MessageStatus>(), Ok(MessageStatus::Delivered));
        assert_eq!("seen".parse::<MessageStatus>(), Ok(MessageStatus::Read));
        assert!("bogus".parse::<MessageStatus>().is_err());
        assert_eq!(
            serde_json::to_value(MessageStatus::Sending).unwrap(),
            Value::String("sending".to_string())
        );
    }

    #[test]
    fn test_shared_handle_identity() {
        let a = SharedMessage::new(record(MessageStatus::Sending));
        let b = a.clone();
        b.update(|r| r.status = MessageStatus::Sent);
        assert_eq!(a.status(), MessageStatus::Sent);
        assert!(a.ptr_eq(&b));

        let c = SharedMessage::new(record(MessageStatus::Sent));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_confirmed_status() {
        let mut r = record(MessageStatus::Sending);
        assert_eq!(r.confirmed_status(), None);

        r.synchronized = true;
        r.status = MessageStatus::Delivered;
        assert_eq!(r.confirmed_status(), Some(MessageStatus::Delivered));

        r.previous_status = Some(MessageStatus::Delivered);
        r.status = MessageStatus::Read;
        assert_eq!(r.confirmed_status(), Some(MessageStatus::Delivered));
    }
}
