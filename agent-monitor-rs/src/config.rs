// agent-monitor-rs/src/config.rs
// Monitor configuration. Validated at construction so a malformed config
// fails fast instead of silently skewing sampling or retry behavior.
//
// Environment variables (all optional, prefix AGENT_MONITOR_):
// - AGENT_MONITOR_AGENT_ID
// - AGENT_MONITOR_TOOL, AGENT_MONITOR_USE_CASE
// - AGENT_MONITOR_ENABLE_SAMPLING, AGENT_MONITOR_SAMPLING_RATE
// - AGENT_MONITOR_ENHANCED_MULTIPLIER, AGENT_MONITOR_PERFORMANCE_THRESHOLD
// - AGENT_MONITOR_MAX_DAILY_SAMPLES, AGENT_MONITOR_SAMPLING_WINDOW
//   ("daily" or a number of seconds)
// - AGENT_MONITOR_BATCH_SIZE, AGENT_MONITOR_BATCH_MAX_AGE_SECS
// - AGENT_MONITOR_REPORT_ASYNC, AGENT_MONITOR_REPORT_TIMEOUT_SECS
// - AGENT_MONITOR_MAX_RETRIES, AGENT_MONITOR_BASE_BACKOFF_MS,
//   AGENT_MONITOR_MAX_BACKOFF_MS
// - AGENT_MONITOR_AUTO_HEALING, AGENT_MONITOR_HEALING_CHECK_EVERY,
//   AGENT_MONITOR_HEALING_CHECK_INTERVAL_SECS,
//   AGENT_MONITOR_HEALING_COOLDOWN_SECS
// - AGENT_MONITOR_HEALTH_WINDOW, AGENT_MONITOR_QUEUE_CAPACITY

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Window over which the daily sample budget applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingWindow {
    /// Resets on UTC date rollover.
    Daily,
    /// Resets every fixed interval.
    Interval(Duration),
}

/// Retry policy for backend calls: max attempts and exponential backoff
/// bounds. Rate-limit errors apply `rate_limit_multiplier` on top.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub rate_limit_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            rate_limit_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Agent identity on the scoring platform.
    pub agent_id: String,
    /// Tool label attached to every feedback submission.
    pub tool: String,
    /// Use-case label attached to every feedback submission.
    pub use_case: String,

    /// When false, every interaction is reported (full monitoring).
    pub enable_sampling: bool,
    /// Base probability that an interaction is sampled. 1.0 bypasses the
    /// sampling engine entirely.
    pub sampling_rate: f64,
    /// Rate multiplier applied while the rolling average score is below
    /// `performance_threshold`. Capped so the effective rate stays <= 1.0.
    pub enhanced_multiplier: f64,
    /// Score below which enhanced sampling kicks in and above which a
    /// healed agent counts as recovered.
    pub performance_threshold: f64,
    /// Hard ceiling on sampled interactions per window. 0 disables sampling
    /// outright.
    pub max_daily_samples: u32,
    pub sampling_window: SamplingWindow,

    /// Flush the batch buffer once this many interactions are queued.
    pub batch_size: usize,
    /// Flush the batch buffer once the oldest queued interaction is this old.
    pub batch_max_age: Duration,

    /// Report through the background worker instead of on the hot path.
    pub report_async: bool,
    /// Per-call timeout for backend submissions.
    pub report_timeout: Duration,
    pub retry: RetryConfig,
    /// Capacity of the async reporting queue; a full queue drops the batch.
    pub queue_capacity: usize,

    /// Heal with the auto strategy (apply prompts) instead of suggest.
    pub auto_healing: bool,
    /// Signal the healing orchestrator every N interactions.
    pub healing_check_every: u64,
    /// Background health poll period, and the minimum spacing between
    /// scan/heal cycle starts.
    pub healing_check_interval: Duration,
    /// How long a healed agent rests before it can be flagged again.
    pub healing_cooldown: Duration,

    /// Rolling window length for the health aggregator.
    pub health_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            tool: "CustomerFeedback".to_string(),
            use_case: "General".to_string(),
            enable_sampling: true,
            sampling_rate: 1.0,
            enhanced_multiplier: 2.0,
            performance_threshold: 75.0,
            max_daily_samples: 1000,
            sampling_window: SamplingWindow::Daily,
            batch_size: 10,
            batch_max_age: Duration::from_secs(60),
            report_async: true,
            report_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            queue_capacity: 256,
            auto_healing: true,
            healing_check_every: 10,
            healing_check_interval: Duration::from_secs(300),
            healing_cooldown: Duration::from_secs(600),
            health_window: 10,
        }
    }
}

impl MonitorConfig {
    /// Construct a config for the given agent with default knobs.
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    /// Construct configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable. Never panics.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let sampling_window = match env::var("AGENT_MONITOR_SAMPLING_WINDOW") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("daily") => SamplingWindow::Daily,
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(|secs| SamplingWindow::Interval(Duration::from_secs(secs)))
                .unwrap_or(defaults.sampling_window),
            Err(_) => defaults.sampling_window,
        };

        Self {
            agent_id: env::var("AGENT_MONITOR_AGENT_ID").unwrap_or(defaults.agent_id),
            tool: env::var("AGENT_MONITOR_TOOL").unwrap_or(defaults.tool),
            use_case: env::var("AGENT_MONITOR_USE_CASE").unwrap_or(defaults.use_case),
            enable_sampling: parse_bool_var("AGENT_MONITOR_ENABLE_SAMPLING", true),
            sampling_rate: parse_env("AGENT_MONITOR_SAMPLING_RATE", defaults.sampling_rate),
            enhanced_multiplier: parse_env(
                "AGENT_MONITOR_ENHANCED_MULTIPLIER",
                defaults.enhanced_multiplier,
            ),
            performance_threshold: parse_env(
                "AGENT_MONITOR_PERFORMANCE_THRESHOLD",
                defaults.performance_threshold,
            ),
            max_daily_samples: parse_env(
                "AGENT_MONITOR_MAX_DAILY_SAMPLES",
                defaults.max_daily_samples,
            ),
            sampling_window,
            batch_size: parse_env("AGENT_MONITOR_BATCH_SIZE", defaults.batch_size),
            batch_max_age: Duration::from_secs(parse_env(
                "AGENT_MONITOR_BATCH_MAX_AGE_SECS",
                defaults.batch_max_age.as_secs(),
            )),
            report_async: parse_bool_var("AGENT_MONITOR_REPORT_ASYNC", true),
            report_timeout: Duration::from_secs(parse_env(
                "AGENT_MONITOR_REPORT_TIMEOUT_SECS",
                defaults.report_timeout.as_secs(),
            )),
            retry: RetryConfig {
                max_attempts: parse_env("AGENT_MONITOR_MAX_RETRIES", defaults.retry.max_attempts),
                base_backoff: Duration::from_millis(parse_env(
                    "AGENT_MONITOR_BASE_BACKOFF_MS",
                    defaults.retry.base_backoff.as_millis() as u64,
                )),
                max_backoff: Duration::from_millis(parse_env(
                    "AGENT_MONITOR_MAX_BACKOFF_MS",
                    defaults.retry.max_backoff.as_millis() as u64,
                )),
                rate_limit_multiplier: defaults.retry.rate_limit_multiplier,
            },
            queue_capacity: parse_env("AGENT_MONITOR_QUEUE_CAPACITY", defaults.queue_capacity),
            auto_healing: parse_bool_var("AGENT_MONITOR_AUTO_HEALING", true),
            healing_check_every: parse_env(
                "AGENT_MONITOR_HEALING_CHECK_EVERY",
                defaults.healing_check_every,
            ),
            healing_check_interval: Duration::from_secs(parse_env(
                "AGENT_MONITOR_HEALING_CHECK_INTERVAL_SECS",
                defaults.healing_check_interval.as_secs(),
            )),
            healing_cooldown: Duration::from_secs(parse_env(
                "AGENT_MONITOR_HEALING_COOLDOWN_SECS",
                defaults.healing_cooldown.as_secs(),
            )),
            health_window: parse_env("AGENT_MONITOR_HEALTH_WINDOW", defaults.health_window),
        }
    }

    /// Reject out-of-range values before any component is built.
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(MonitorError::Validation("agent_id must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(MonitorError::Validation(format!(
                "sampling_rate must be within [0, 1], got {}",
                self.sampling_rate
            )));
        }
        if self.enhanced_multiplier < 1.0 {
            return Err(MonitorError::Validation(format!(
                "enhanced_multiplier must be >= 1.0, got {}",
                self.enhanced_multiplier
            )));
        }
        if !(0.0..=100.0).contains(&self.performance_threshold) {
            return Err(MonitorError::Validation(format!(
                "performance_threshold must be within [0, 100], got {}",
                self.performance_threshold
            )));
        }
        if self.batch_size < 1 {
            return Err(MonitorError::Validation("batch_size must be >= 1".into()));
        }
        if self.health_window < 2 {
            return Err(MonitorError::Validation(
                "health_window must be >= 2 to compute a trend".into(),
            ));
        }
        if self.queue_capacity < 1 {
            return Err(MonitorError::Validation("queue_capacity must be >= 1".into()));
        }
        if self.retry.max_attempts < 1 {
            return Err(MonitorError::Validation(
                "retry.max_attempts must be >= 1".into(),
            ));
        }
        if self.healing_check_interval.is_zero() {
            return Err(MonitorError::Validation(
                "healing_check_interval must be > 0".into(),
            ));
        }
        if self.report_timeout.is_zero() {
            return Err(MonitorError::Validation("report_timeout must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(val) => {
            let v = val.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        MonitorConfig::for_agent("agent-1").validate().unwrap();
    }

    #[test]
    fn out_of_range_sampling_rate_is_rejected() {
        let mut cfg = MonitorConfig::for_agent("agent-1");
        cfg.sampling_rate = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, MonitorError::Validation(_)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cfg = MonitorConfig::for_agent("agent-1");
        cfg.batch_size = 0;
        assert!(matches!(
            cfg.validate(),
            Err(MonitorError::Validation(_))
        ));
    }

    #[test]
    fn empty_agent_id_is_rejected() {
        let cfg = MonitorConfig::default();
        assert!(matches!(
            cfg.validate(),
            Err(MonitorError::Validation(_))
        ));
    }

    #[test]
    fn threshold_above_scale_is_rejected() {
        let mut cfg = MonitorConfig::for_agent("agent-1");
        cfg.performance_threshold = 120.0;
        assert!(matches!(
            cfg.validate(),
            Err(MonitorError::Validation(_))
        ));
    }
}
