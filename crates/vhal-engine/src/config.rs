//! Engine configuration

use std::time::Duration;

use serde::Deserialize;

/// Tunables for the dispatch and subscription engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a dispatched request may stay unanswered before the
    /// client receives a synthetic TRY_AGAIN result.
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            request_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
