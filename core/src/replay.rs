/// Replay commands: drive a cache from newline-delimited JSON.
///
/// Each line is one command, e.g.
///   {"op":"send","conversation_id":"room","payload":"hi"}
///   {"op":"server","message":{"correlationId":"...","id":"s1","status":"sent"}}
///   {"op":"slice","conversation_id":"room","limit":20}
use crate::cache::MessageCache;
use crate::record::{MessageStatus, SharedMessage};
use serde::Deserialize;
use serde_json::{json, Map, Value};

const DEFAULT_SLICE_LIMIT: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayCommand {
    /// Local outgoing message
    Send {
        conversation_id: String,
        payload: Value,
    },
    /// Server-delivered record (confirmation or inbound)
    Server { message: Value },
    /// History batch
    History {
        messages: Vec<Value>,
        #[serde(default)]
        sort: bool,
    },
    Optimistic {
        id: String,
        status: MessageStatus,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    Ack {
        id: String,
        status: MessageStatus,
    },
    Fail { id: String },
    Rollback { id: String },
    Retry { id: String },
    Get { id: String },
    Slice {
        conversation_id: String,
        #[serde(default = "default_limit")]
        limit: usize,
        #[serde(default)]
        offset: usize,
    },
    Profile { user_id: String, profile: Value },
    Evict,
    Clear {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Metrics,
}

fn default_limit() -> usize {
    DEFAULT_SLICE_LIMIT
}

impl ReplayCommand {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    fn name(&self) -> &'static str {
        match self {
            ReplayCommand::Send { .. } => "send",
            ReplayCommand::Server { .. } => "server",
            ReplayCommand::History { .. } => "history",
            ReplayCommand::Optimistic { .. } => "optimistic",
            ReplayCommand::Ack { .. } => "ack",
            ReplayCommand::Fail { .. } => "fail",
            ReplayCommand::Rollback { .. } => "rollback",
            ReplayCommand::Retry { .. } => "retry",
            ReplayCommand::Get { .. } => "get",
            ReplayCommand::Slice { .. } => "slice",
            ReplayCommand::Profile { .. } => "profile",
            ReplayCommand::Evict => "evict",
            ReplayCommand::Clear { .. } => "clear",
            ReplayCommand::Metrics => "metrics",
        }
    }
}

fn record_json(record: Option<SharedMessage>) -> Value {
    record
        .and_then(|m| serde_json::to_value(m.snapshot()).ok())
        .unwrap_or(Value::Null)
}

fn records_json(records: &[SharedMessage]) -> Value {
    Value::Array(records.iter().map(|m| record_json(Some(m.clone()))).collect())
}

/// Apply one command and describe the outcome as JSON
pub fn apply(cache: &mut MessageCache, command: ReplayCommand) -> Value {
    let op = command.name();
    let result = match command {
        ReplayCommand::Send {
            conversation_id,
            payload,
        } => record_json(Some(cache.send_local(&conversation_id, payload))),
        ReplayCommand::Server { message } => record_json(Some(cache.reconcile(&message))),
        ReplayCommand::History { messages, sort } => records_json(&cache.bulk_load(messages, sort)),
        ReplayCommand::Optimistic { id, status, fields } => {
            record_json(cache.apply_optimistic(&id, status, fields))
        }
        ReplayCommand::Ack { id, status } => record_json(cache.acknowledge(&id, status)),
        ReplayCommand::Fail { id } => record_json(cache.mark_failed(&id)),
        ReplayCommand::Rollback { id } => record_json(cache.rollback(&id)),
        ReplayCommand::Retry { id } => record_json(cache.retry(&id)),
        ReplayCommand::Get { id } => record_json(cache.get_message(&id)),
        ReplayCommand::Slice {
            conversation_id,
            limit,
            offset,
        } => records_json(&cache.get_slice(&conversation_id, limit, offset)),
        ReplayCommand::Profile { user_id, profile } => {
            cache.put_profile(&user_id, profile);
            json!(cache.profile_count())
        }
        ReplayCommand::Evict => json!(cache.evict_expired()),
        ReplayCommand::Clear { conversation_id } => match conversation_id {
            Some(id) => json!(cache.clear_conversation(&id)),
            None => {
                cache.clear_all();
                json!(0)
            }
        },
        ReplayCommand::Metrics => serde_json::to_value(cache.metrics()).unwrap_or(Value::Null),
    };
    json!({ "op": op, "result": result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;

    fn run(cache: &mut MessageCache, line: &str) -> Value {
        apply(cache, ReplayCommand::parse(line).unwrap())
    }

    #[test]
    fn test_replay_send_confirm_slice() {
        let mut cache =
            MessageCache::with_clock(CacheConfig::default(), ManualClock::new(1_700_000_000_000));

        let sent = run(&mut cache, r#"{"op":"send","conversation_id":"room","payload":"hi"}"#);
        assert_eq!(sent["op"], "send");
        assert_eq!(sent["result"]["status"], "sending");
        let cid = sent["result"]["correlationId"].as_str().unwrap().to_string();

        let line = json!({"op": "server", "message": {"correlationId": cid, "id": "s1"}}).to_string();
        let confirmed = run(&mut cache, &line);
        assert_eq!(confirmed["result"]["serverId"], "s1");
        assert_eq!(confirmed["result"]["synchronized"], true);

        let slice = run(&mut cache, r#"{"op":"slice","conversation_id":"room"}"#);
        assert_eq!(slice["result"].as_array().unwrap().len(), 1);

        let metrics = run(&mut cache, r#"{"op":"metrics"}"#);
        assert_eq!(metrics["result"]["reconciliations"], 1);
    }

    #[test]
    fn test_replay_misses_are_null() {
        let mut cache = MessageCache::new(CacheConfig::default());
        let out = run(&mut cache, r#"{"op":"ack","id":"nope","status":"read"}"#);
        assert_eq!(out["result"], Value::Null);
        assert!(ReplayCommand::parse(r#"{"op":"explode"}"#).is_err());
    }
}
