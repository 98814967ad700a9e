// agent-monitor-rs/src/interaction.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single wrapped inference call. Built once by the interaction wrapper
/// and immutable afterwards; ownership moves to the batch buffer when the
/// call is sampled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub interaction_id: String,
    pub prompt: String,
    pub response: String,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub sampled: bool,
}

impl Interaction {
    pub fn new(
        prompt: impl Into<String>,
        response: impl Into<String>,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
        sampled: bool,
    ) -> Self {
        Self {
            interaction_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            response: response.into(),
            latency_ms,
            timestamp,
            sampled,
        }
    }
}
