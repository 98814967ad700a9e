//! # Agent Monitor - Interaction Monitoring and Self-Healing
//!
//! Drop-in wrapper around an arbitrary inference function. Per call it
//! decides whether to report the interaction for quality scoring (adaptive
//! sampling under a daily budget), accumulates sampled interactions into
//! size/time-bounded batches, folds returned scores into a rolling health
//! signal, and drives a two-phase self-healing cycle (scan, then heal)
//! against the scoring backend.
//!
//! The serving path is hermetically isolated from the monitoring path: only
//! the injected model's own failure ever propagates out of
//! [`AgentMonitor::generate_response`].
//!
//! ```ignore
//! let backend: Arc<dyn ScoringBackend> = Arc::new(client);
//! let model = Arc::new(FnInference(|prompt: &str| my_model(prompt)));
//! let monitor = AgentMonitor::new(MonitorConfig::for_agent("agent-1"), model, backend)?;
//!
//! let response = monitor.generate_response("What is your return policy?").await?;
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod healing;
pub mod interaction;

mod batch;
mod monitor;
mod reporter;
mod sampling;


pub use backend::{
    AgentHealth, FeedbackResult, FeedbackSubmission, HealOutcome, HealStrategy, HealthStatus,
    ScanOutcome, ScoringBackend,
};
pub use batch::BatchBuffer;
pub use clock::{Clock, SystemClock};
pub use config::{MonitorConfig, RetryConfig, SamplingWindow};
pub use error::{MonitorError, Result};
pub use healing::HealingState;
pub use health::{HealthAggregator, HealthSnapshot, ScoreTrend};
pub use interaction::Interaction;
pub use monitor::{AgentMonitor, FnInference, InferenceModel};
pub use reporter::QualityReporter;
pub use sampling::SamplingGate;
