// agent-monitor-rs/src/backend.rs
// The external collaborator seam: everything the monitoring core needs from
// the remote scoring/healing service, behind one async trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Categorical health judgment derived from recent quality scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn needs_healing(&self) -> bool {
        matches!(self, HealthStatus::Warning | HealthStatus::Critical)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Evaluation of a single interaction, as returned by the scoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResult {
    /// 0-100 quality score.
    pub score: f64,
    /// Main issue tag, if the evaluator found one.
    pub issue: Option<String>,
    pub feedback_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Server-side view of an agent's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub status: HealthStatus,
    pub average_score: f64,
    pub total_interactions: u64,
}

/// Result of a self-healing scan across agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub total_agents_scanned: u32,
    pub agents_flagged: Vec<String>,
}

impl ScanOutcome {
    pub fn flags(&self, agent_id: &str) -> bool {
        self.agents_flagged.iter().any(|id| id == agent_id)
    }
}

/// How a heal should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealStrategy {
    /// Apply an improved prompt directly, mutating agent configuration.
    Auto,
    /// Return a recommendation only; no mutation.
    Suggest,
}

impl HealStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealStrategy::Auto => "auto",
            HealStrategy::Suggest => "suggest",
        }
    }
}

/// Result of healing a flagged agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealOutcome {
    /// New prompt that was applied server-side (auto strategy).
    pub applied_prompt: Option<String>,
    /// Recommended prompt change (suggest strategy).
    pub suggestion: Option<String>,
}

/// A feedback submission for one interaction.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackSubmission<'a> {
    pub prompt: &'a str,
    pub response: &'a str,
    pub tool: &'a str,
    pub use_case: &'a str,
    pub agent_id: &'a str,
}

/// Client contract against the remote scoring/healing service. All calls are
/// single request/response exchanges; none stream.
#[async_trait]
pub trait ScoringBackend: Send + Sync + std::fmt::Debug {
    async fn submit_feedback(&self, submission: FeedbackSubmission<'_>) -> Result<FeedbackResult>;

    async fn get_health(&self, agent_id: &str) -> Result<AgentHealth>;

    async fn trigger_scan(&self) -> Result<ScanOutcome>;

    async fn heal_agent(&self, agent_id: &str, strategy: HealStrategy) -> Result<HealOutcome>;
}
