use serde::Deserialize;

use crate::rate_limit::DEFAULT_CAPACITY;

/// Rate limiter cache configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ThrottlingSettings {
    /// Maximum number of distinct identities tracked at once
    /// Once reached, the least recently used identity loses its window
    /// Default: 10000
    #[serde(default = "default_lru_cache_capacity")]
    pub lru_cache_capacity: u64,
    /// Forget identities not seen for this many seconds (optional)
    /// Default: None (counters live until evicted by capacity)
    #[serde(default)]
    pub expire_idle_secs: Option<u64>,
}

impl Default for ThrottlingSettings {
    fn default() -> Self {
        Self { lru_cache_capacity: default_lru_cache_capacity(), expire_idle_secs: None }
    }
}

fn default_lru_cache_capacity() -> u64 {
    DEFAULT_CAPACITY
}
