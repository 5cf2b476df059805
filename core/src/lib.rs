/// Msgcache - client-resident chat message cache
///
/// Holds messages per conversation in chronological order, applies optimistic
/// status changes ahead of the server, and reconciles them with authoritative
/// server records. Bounded by per-conversation and total caps plus an age sweep.

pub mod cache;
pub mod clock;
pub mod config;
pub mod conversation_store;
pub mod error;
pub mod events;
pub mod identifier_index;
pub mod metrics;
pub mod normalizer;
pub mod profile_store;
pub mod record;
pub mod replay;
pub mod session;
pub mod tasks;

pub use cache::MessageCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use events::CacheEvent;
pub use record::{MessageRecord, MessageStatus, SharedMessage};
pub use session::CacheSession;
