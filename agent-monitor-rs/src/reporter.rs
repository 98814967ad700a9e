// agent-monitor-rs/src/reporter.rs
// Submits sampled interactions to the scoring backend. Every backend call
// is bounded by the configured timeout; transient failures are retried with
// exponential backoff and jitter, rate limits back off harder. A batch is
// retried as a whole and dropped after the attempt budget, never buffered
// indefinitely.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::backend::{FeedbackResult, FeedbackSubmission, ScoringBackend};
use crate::config::RetryConfig;
use crate::error::{MonitorError, Result};
use crate::interaction::Interaction;

#[derive(Debug, Clone)]
pub struct QualityReporter {
    backend: Arc<dyn ScoringBackend>,
    agent_id: String,
    tool: String,
    use_case: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl QualityReporter {
    pub fn new(
        backend: Arc<dyn ScoringBackend>,
        agent_id: String,
        tool: String,
        use_case: String,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            agent_id,
            tool,
            use_case,
            timeout,
            retry,
        }
    }

    /// Submit one interaction, retrying transient failures up to the
    /// configured attempt budget.
    pub async fn submit(&self, interaction: &Interaction) -> Result<FeedbackResult> {
        let mut attempt: u32 = 0;
        loop {
            match self.submit_once(interaction).await {
                Ok(result) => {
                    metrics::increment_counter!("agent_monitor_reports_total");
                    return Ok(result);
                }
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let backoff = self.backoff_delay(attempt, &err);
                    debug!(
                        agent_id = %self.agent_id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying feedback submission"
                    );
                    attempt += 1;
                    sleep(backoff).await;
                }
                Err(err) => {
                    metrics::increment_counter!("agent_monitor_report_failures_total");
                    return Err(err);
                }
            }
        }
    }

    /// Submit a flushed batch, retrying the whole batch on a transient
    /// failure. After the attempt budget the batch is surrendered to the
    /// caller as an error (and dropped there).
    pub async fn submit_batch(&self, batch: &[Interaction]) -> Result<Vec<FeedbackResult>> {
        let mut attempt: u32 = 0;
        loop {
            match self.submit_batch_once(batch).await {
                Ok(results) => return Ok(results),
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let backoff = self.backoff_delay(attempt, &err);
                    warn!(
                        agent_id = %self.agent_id,
                        batch_len = batch.len(),
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "batch submission failed, retrying as a whole"
                    );
                    attempt += 1;
                    sleep(backoff).await;
                }
                Err(err) => {
                    metrics::increment_counter!("agent_monitor_report_failures_total");
                    return Err(err);
                }
            }
        }
    }

    /// Single best-effort pass over a batch with no retry. Shutdown path.
    pub async fn submit_batch_once(&self, batch: &[Interaction]) -> Result<Vec<FeedbackResult>> {
        let mut results = Vec::with_capacity(batch.len());
        for interaction in batch {
            let result = self.submit_once(interaction).await?;
            metrics::increment_counter!("agent_monitor_reports_total");
            results.push(result);
        }
        Ok(results)
    }

    async fn submit_once(&self, interaction: &Interaction) -> Result<FeedbackResult> {
        let submission = FeedbackSubmission {
            prompt: &interaction.prompt,
            response: &interaction.response,
            tool: &self.tool,
            use_case: &self.use_case,
            agent_id: &self.agent_id,
        };
        match tokio::time::timeout(self.timeout, self.backend.submit_feedback(submission)).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Transport(format!(
                "feedback submission timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn backoff_delay(&self, attempt: u32, err: &MonitorError) -> Duration {
        let base = self.retry.base_backoff.as_millis() as f64;
        let mut delay = base * 2.0_f64.powi(attempt as i32);
        if err.is_rate_limit() {
            delay *= self.retry.rate_limit_multiplier;
        }
        let capped = delay.min(self.retry.max_backoff.as_millis() as f64);
        // Full jitter of +/-10% keeps retries from synchronizing.
        let jitter_range = capped * 0.1;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}
