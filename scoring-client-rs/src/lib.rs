//! # Scoring Client - HTTP Backend for Agent Monitoring
//!
//! Thin reqwest implementation of the [`ScoringBackend`] contract against
//! the quality scoring / self-healing REST service. Carries no decision
//! logic: it shapes payloads, attaches the API credential, and maps status
//! codes onto the monitoring error taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use agent_monitor::{
    AgentHealth, FeedbackResult, FeedbackSubmission, HealOutcome, HealStrategy, HealthStatus,
    MonitorError, Result, ScanOutcome, ScoringBackend,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only analytics view of an agent, outside the core control flow.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentInsights {
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub recent_issues: Vec<serde_json::Value>,
    #[serde(default = "default_trend")]
    pub score_trend: String,
    #[serde(default)]
    pub feedback_count: u64,
    #[serde(default)]
    pub average_score: f64,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    #[serde(default)]
    pub last_updated: String,
}

fn default_trend() -> String {
    "stable".to_string()
}

#[derive(Debug)]
pub struct HttpScoringClient {
    client: Client,
    base_url: String,
}

impl HttpScoringClient {
    /// Build a client for the given endpoint. The API key is attached to
    /// every request as an `x-api-key` header and marked sensitive.
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        Self::with_timeout(api_key, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(MonitorError::Validation("api key must not be empty".into()));
        }

        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| MonitorError::Validation("api key contains invalid characters".into()))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", key);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| MonitorError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Agent insights passthrough (`GET /agent/feedback/insights`).
    pub async fn agent_insights(&self, agent_id: &str) -> Result<AgentInsights> {
        let response = self
            .client
            .get(self.url("/agent/feedback/insights"))
            .query(&[("agent_id", agent_id)])
            .send()
            .await
            .map_err(from_reqwest)?;
        handle_json(response, "agent_insights").await
    }
}

#[async_trait]
impl ScoringBackend for HttpScoringClient {
    async fn submit_feedback(&self, submission: FeedbackSubmission<'_>) -> Result<FeedbackResult> {
        let response = self
            .client
            .post(self.url("/feedback/customer"))
            .json(&submission)
            .send()
            .await
            .map_err(from_reqwest)?;
        let wire: FeedbackWire = handle_json(response, "submit_feedback").await?;
        debug!(score = wire.score, issue = ?wire.issue, "feedback scored");
        Ok(wire.into())
    }

    async fn get_health(&self, agent_id: &str) -> Result<AgentHealth> {
        let response = self
            .client
            .get(self.url("/agent/external/health"))
            .query(&[("agent_id", agent_id)])
            .send()
            .await
            .map_err(from_reqwest)?;
        let wire: HealthWire = handle_json(response, "get_health").await?;
        Ok(AgentHealth {
            status: wire.status,
            average_score: wire.average_score,
            total_interactions: wire.total_interactions,
        })
    }

    async fn trigger_scan(&self) -> Result<ScanOutcome> {
        let response = self
            .client
            .post(self.url("/self-healing/scan"))
            .json(&json!({}))
            .send()
            .await
            .map_err(from_reqwest)?;
        let wire: ScanWire = handle_json(response, "trigger_scan").await?;
        Ok(ScanOutcome {
            total_agents_scanned: wire.total_agents_scanned,
            agents_flagged: wire.agents_flagged,
        })
    }

    async fn heal_agent(&self, agent_id: &str, strategy: HealStrategy) -> Result<HealOutcome> {
        let response = self
            .client
            .post(self.url("/agent/self_heal"))
            .json(&json!({
                "agent_id": agent_id,
                "strategy": strategy.as_str(),
            }))
            .send()
            .await
            .map_err(from_reqwest)?;
        let wire: HealWire = handle_json(response, "heal_agent").await?;
        Ok(HealOutcome {
            applied_prompt: wire.applied_prompt,
            suggestion: wire.suggestion,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FeedbackWire {
    score: f64,
    #[serde(default)]
    issue: Option<String>,
    #[serde(default)]
    feedback_log_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl From<FeedbackWire> for FeedbackResult {
    fn from(wire: FeedbackWire) -> Self {
        let timestamp = wire
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        FeedbackResult {
            score: wire.score,
            issue: wire.issue.filter(|i| !i.trim().is_empty()),
            feedback_id: wire
                .feedback_log_id
                .unwrap_or_else(|| "unknown".to_string()),
            timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthWire {
    status: HealthStatus,
    #[serde(default)]
    average_score: f64,
    #[serde(default)]
    total_interactions: u64,
}

#[derive(Debug, Deserialize)]
struct ScanWire {
    #[serde(default)]
    total_agents_scanned: u32,
    #[serde(default)]
    agents_flagged: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HealWire {
    #[serde(default)]
    applied_prompt: Option<String>,
    #[serde(default, alias = "suggested_prompt")]
    suggestion: Option<String>,
}

async fn handle_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| MonitorError::Serialization(format!("{operation}: {e}")))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, operation, &body))
    }
}

fn map_status(status: StatusCode, operation: &str, body: &str) -> MonitorError {
    let detail = format!("{operation} returned {}: {}", status.as_u16(), body.trim());
    match status.as_u16() {
        401 | 403 => MonitorError::Authentication(detail),
        409 => MonitorError::InvalidHealingState(detail),
        429 => MonitorError::RateLimit(detail),
        400..=499 => MonitorError::Validation(detail),
        _ => MonitorError::Transport(detail),
    }
}

fn from_reqwest(err: reqwest::Error) -> MonitorError {
    MonitorError::Transport(format!("http request failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_onto_the_error_taxonomy() {
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "op", ""),
            MonitorError::Validation(_)
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "op", ""),
            MonitorError::Authentication(_)
        ));
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, "op", ""),
            MonitorError::Authentication(_)
        ));
        assert!(matches!(
            map_status(StatusCode::CONFLICT, "op", ""),
            MonitorError::InvalidHealingState(_)
        ));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "op", ""),
            MonitorError::RateLimit(_)
        ));
        assert!(matches!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, "op", ""),
            MonitorError::Transport(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "op", ""),
            MonitorError::Transport(_)
        ));
    }

    #[test]
    fn server_errors_are_transient_but_client_errors_are_not() {
        assert!(map_status(StatusCode::SERVICE_UNAVAILABLE, "op", "").is_transient());
        assert!(map_status(StatusCode::TOO_MANY_REQUESTS, "op", "").is_transient());
        assert!(!map_status(StatusCode::BAD_REQUEST, "op", "").is_transient());
        assert!(!map_status(StatusCode::UNAUTHORIZED, "op", "").is_transient());
    }

    #[test]
    fn feedback_wire_maps_fields_and_tolerates_gaps() {
        let wire: FeedbackWire = serde_json::from_value(serde_json::json!({
            "score": 82.5,
            "issue": "tone",
            "feedback_log_id": "fb-123",
            "timestamp": "2025-06-01T10:00:00Z"
        }))
        .unwrap();
        let result = FeedbackResult::from(wire);
        assert_eq!(result.score, 82.5);
        assert_eq!(result.issue.as_deref(), Some("tone"));
        assert_eq!(result.feedback_id, "fb-123");

        // Minimal payload still decodes.
        let wire: FeedbackWire = serde_json::from_value(serde_json::json!({
            "score": 70.0
        }))
        .unwrap();
        let result = FeedbackResult::from(wire);
        assert_eq!(result.issue, None);
        assert_eq!(result.feedback_id, "unknown");
    }

    #[test]
    fn heal_wire_accepts_the_legacy_suggestion_key() {
        let wire: HealWire = serde_json::from_value(serde_json::json!({
            "suggested_prompt": "tighten the tone"
        }))
        .unwrap();
        assert_eq!(wire.suggestion.as_deref(), Some("tighten the tone"));
        assert_eq!(wire.applied_prompt, None);
    }

    #[test]
    fn health_wire_decodes_lowercase_statuses() {
        let wire: HealthWire = serde_json::from_value(serde_json::json!({
            "status": "warning",
            "average_score": 68.0,
            "total_interactions": 17
        }))
        .unwrap();
        assert_eq!(wire.status, HealthStatus::Warning);
        assert_eq!(wire.total_interactions, 17);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = HttpScoringClient::new("  ", "http://localhost:5001").unwrap_err();
        assert!(matches!(err, MonitorError::Validation(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = HttpScoringClient::new("key", "http://localhost:5001/").unwrap();
        assert_eq!(
            client.url("/feedback/customer"),
            "http://localhost:5001/feedback/customer"
        );
    }
}
