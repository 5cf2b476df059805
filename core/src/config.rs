/// Configuration management
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_CACHE_SIZE: usize = 5_000;
const DEFAULT_MAX_CONVERSATION_SIZE: usize = 500;
const DEFAULT_MAX_AGE_MS: u64 = 30 * 60 * 1000;
const DEFAULT_EVICTION_INTERVAL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Total record cap across all conversations
    pub max_cache_size: usize,

    /// Per-conversation record cap
    pub max_conversation_size: usize,

    /// Age (ms since last update) after which settled records are swept
    #[serde(rename = "maxAge")]
    pub max_age_ms: u64,

    /// Period of the age sweep
    pub eviction_interval_ms: u64,

    /// Buffered change events per subscriber
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_conversation_size: DEFAULT_MAX_CONVERSATION_SIZE,
            max_age_ms: DEFAULT_MAX_AGE_MS,
            eviction_interval_ms: DEFAULT_EVICTION_INTERVAL_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Options for the replay binary
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub cache: CacheConfig,
    /// Command file; stdin when absent
    pub input: Option<PathBuf>,
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: CacheConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MSGCACHE_*` environment overrides
    pub fn apply_env(mut self) -> Self {
        if let Some(v) = env_number("MSGCACHE_MAX_CACHE_SIZE") {
            self.max_cache_size = v as usize;
        }
        if let Some(v) = env_number("MSGCACHE_MAX_CONVERSATION_SIZE") {
            self.max_conversation_size = v as usize;
        }
        if let Some(v) = env_number("MSGCACHE_MAX_AGE_MS") {
            self.max_age_ms = v;
        }
        if let Some(v) = env_number("MSGCACHE_EVICTION_INTERVAL_MS") {
            self.eviction_interval_ms = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_conversation_size == 0 {
            return Err(CacheError::Config(
                "maxConversationSize must be greater than zero".to_string(),
            ));
        }
        if self.max_cache_size < self.max_conversation_size {
            return Err(CacheError::Config(format!(
                "maxCacheSize ({}) must be at least maxConversationSize ({})",
                self.max_cache_size, self.max_conversation_size
            )));
        }
        if self.eviction_interval_ms == 0 {
            return Err(CacheError::Config(
                "evictionIntervalMs must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(CacheError::Config(
                "eventCapacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse replay command line arguments
    pub fn from_args(args: &[String]) -> Result<ReplayOptions> {
        let mut config: Option<CacheConfig> = None;
        let mut overrides: Vec<(&str, u64)> = Vec::new();
        let mut input = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        CacheError::Config("--config requires a path argument".to_string())
                    })?;
                    config = Some(Self::from_file(Path::new(path))?);
                    i += 2;
                }
                flag @ ("--max-cache-size"
                | "--max-conversation-size"
                | "--max-age-ms"
                | "--eviction-interval-ms") => {
                    let value = args
                        .get(i + 1)
                        .ok_or_else(|| CacheError::Config(format!("{} requires a value", flag)))?
                        .parse::<u64>()
                        .map_err(|_| {
                            CacheError::Config(format!("{} must be a non-negative number", flag))
                        })?;
                    overrides.push((flag, value));
                    i += 2;
                }
                other if other.starts_with("--") => {
                    return Err(CacheError::Config(format!(
                        "Unknown option {}. Usage: {} [--config <path>] [--max-cache-size N] [--max-conversation-size N] [--max-age-ms N] [--eviction-interval-ms N] [input]",
                        other,
                        args.first().map(String::as_str).unwrap_or("replay")
                    )));
                }
                other => {
                    input = Some(PathBuf::from(other));
                    i += 1;
                }
            }
        }

        // Env applies over the file, flags over both
        let mut cache = config.unwrap_or_default().apply_env();
        for (flag, value) in overrides {
            match flag {
                "--max-cache-size" => cache.max_cache_size = value as usize,
                "--max-conversation-size" => cache.max_conversation_size = value as usize,
                "--max-age-ms" => cache.max_age_ms = value,
                _ => cache.eviction_interval_ms = value,
            }
        }
        cache.validate()?;

        Ok(ReplayOptions { cache, input })
    }
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
}
