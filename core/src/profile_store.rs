/// Auxiliary user profile cache, swept together with messages
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProfile {
    pub user_id: String,
    pub profile: Value,
    pub cached_at: i64,
}

#[derive(Debug, Default)]
pub struct ProfileStore {
    entries: HashMap<String, CachedProfile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, user_id: &str, profile: Value, now_ms: i64) {
        self.entries.insert(
            user_id.to_string(),
            CachedProfile {
                user_id: user_id.to_string(),
                profile,
                cached_at: now_ms,
            },
        );
    }

    pub fn get(&self, user_id: &str) -> Option<&CachedProfile> {
        self.entries.get(user_id)
    }

    /// Drop entries cached before `cutoff_ms`; returns how many went
    pub fn expire_before(&mut self, cutoff_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, p| p.cached_at >= cutoff_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
