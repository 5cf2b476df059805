/// Message record normalizer
///
/// Turns heterogeneous inbound payloads into [`MessageRecord`]s. Never fails:
/// missing mandatory fields are replaced by defaults and reported back so the
/// caller can log them.
use crate::record::{MessageRecord, MessageStatus};
use chrono::DateTime;
use rand::Rng;
use serde_json::{Map, Value};

pub const UNKNOWN_CONVERSATION: &str = "unknown";

const SERVER_ID_KEYS: &[&str] = &["serverId", "server_id", "id", "_id", "messageId"];
const CORRELATION_ID_KEYS: &[&str] = &["correlationId", "correlation_id", "clientId", "tempId"];
const CONVERSATION_ID_KEYS: &[&str] = &["conversationId", "conversation_id", "chatId", "roomId"];
const PAYLOAD_KEYS: &[&str] = &["payload", "content", "text", "body"];
const CREATED_AT_KEYS: &[&str] = &["createdAt", "created_at", "timestamp"];
const SENDER_ID_KEYS: &[&str] = &["senderId", "sender_id", "from"];
const ATTRIBUTES_KEY: &str = "attributes";

/// Below this an epoch value is taken to be in seconds
const SECONDS_THRESHOLD: i64 = 100_000_000_000;

/// Fields pulled out of a raw payload, each absent when missing or unusable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundFields {
    pub server_id: Option<String>,
    pub correlation_id: Option<String>,
    pub conversation_id: Option<String>,
    pub sender_id: Option<String>,
    pub payload: Option<Value>,
    pub created_at: Option<i64>,
    pub status: Option<MessageStatus>,
    pub attributes: Map<String, Value>,
}

impl InboundFields {
    pub fn extract(raw: &Value) -> Self {
        let obj = match raw {
            Value::Object(obj) => obj,
            Value::Null => return Self::default(),
            // Bare content with no envelope
            other => {
                return Self {
                    payload: Some(other.clone()),
                    ..Self::default()
                }
            }
        };

        Self {
            server_id: first_id(obj, SERVER_ID_KEYS),
            correlation_id: first_id(obj, CORRELATION_ID_KEYS),
            conversation_id: first_id(obj, CONVERSATION_ID_KEYS),
            sender_id: first_id(obj, SENDER_ID_KEYS),
            payload: PAYLOAD_KEYS.iter().find_map(|k| obj.get(*k).cloned()),
            created_at: CREATED_AT_KEYS
                .iter()
                .find_map(|k| obj.get(*k).and_then(parse_timestamp)),
            status: obj
                .get("status")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
            attributes: obj
                .get(ATTRIBUTES_KEY)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Status to apply; a record the server has assigned an id to is at least `sent`
    pub fn effective_status(&self, status_hint: MessageStatus) -> MessageStatus {
        match self.status.unwrap_or(status_hint) {
            MessageStatus::Sending if self.server_id.is_some() => MessageStatus::Sent,
            status => status,
        }
    }
}

/// A normalized record plus the mandatory fields that had to be defaulted
#[derive(Debug, Clone)]
pub struct Normalized {
    pub record: MessageRecord,
    pub defaulted: Vec<&'static str>,
}

impl Normalized {
    pub fn is_malformed(&self) -> bool {
        !self.defaulted.is_empty()
    }
}

/// Normalize a raw payload. `status_hint` applies when the payload carries no status.
pub fn normalize(raw: &Value, status_hint: MessageStatus, now_ms: i64) -> Normalized {
    from_fields(InboundFields::extract(raw), status_hint, now_ms)
}

pub fn from_fields(fields: InboundFields, status_hint: MessageStatus, now_ms: i64) -> Normalized {
    let mut defaulted = Vec::new();
    let status = fields.effective_status(status_hint);

    let conversation_id = fields.conversation_id.unwrap_or_else(|| {
        defaulted.push("conversationId");
        UNKNOWN_CONVERSATION.to_string()
    });
    let payload = fields.payload.unwrap_or_else(|| {
        defaulted.push("payload");
        Value::Null
    });

    let record = MessageRecord {
        server_id: fields.server_id,
        correlation_id: fields
            .correlation_id
            .unwrap_or_else(|| generate_correlation_id(now_ms)),
        conversation_id,
        sender_id: fields.sender_id,
        payload,
        attributes: fields.attributes,
        status,
        previous_status: None,
        created_at: fields.created_at.unwrap_or(now_ms),
        updated_at: now_ms,
        synchronized: status != MessageStatus::Sending,
    };

    Normalized { record, defaulted }
}

/// `local-<millis base36>-<64 random bits>`
pub fn generate_correlation_id(now_ms: i64) -> String {
    let random: u64 = rand::thread_rng().gen();
    format!("local-{}-{:016x}", to_base36(now_ms.max(0) as u64), random)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn first_id(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(n) => n,
                Err(_) => DateTime::parse_from_rfc3339(s).ok()?.timestamp_millis(),
            }
        }
        _ => return None,
    };
    if ms < 0 {
        return None;
    }
    Some(if ms < SECONDS_THRESHOLD { ms * 1000 } else { ms })
}
