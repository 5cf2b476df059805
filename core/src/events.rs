/// Change events broadcast to cache subscribers (e.g. the rendering layer)
use crate::record::MessageStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A record entered a conversation bucket
    MessageAdded {
        conversation_id: String,
        correlation_id: String,
    },
    /// Status or content of a cached record changed
    MessageUpdated {
        conversation_id: String,
        correlation_id: String,
        status: MessageStatus,
    },
    /// Records left the cache through trimming or the age sweep
    MessagesEvicted { conversation_id: String, count: usize },
    ConversationCleared { conversation_id: String },
    CacheCleared,
}
