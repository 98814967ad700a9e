// agent-monitor-rs/src/monitor.rs
// Top-level façade. Wraps an injected inference capability, times each
// call, and routes sampled interactions through the batch/report/health/
// healing pipeline. The caller's response path only ever sees the model's
// own errors; every monitoring failure is logged and swallowed here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{AgentHealth, ScoringBackend};
use crate::batch::BatchBuffer;
use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::healing::{HealingState, SelfHealingOrchestrator};
use crate::health::{HealthAggregator, HealthSnapshot};
use crate::interaction::Interaction;
use crate::reporter::QualityReporter;
use crate::sampling::SamplingGate;

/// The injected inference capability: a single input -> output contract.
#[async_trait]
pub trait InferenceModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Adapter turning a plain synchronous closure into an [`InferenceModel`].
pub struct FnInference<F>(pub F);

#[async_trait]
impl<F> InferenceModel for FnInference<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok((self.0)(prompt))
    }
}

/// Shared tail of the reporting pipeline: submit a batch, fold the scores
/// into the health window, and signal the healing orchestrator.
#[derive(Clone)]
struct ScorePipeline {
    reporter: Arc<QualityReporter>,
    health: Arc<HealthAggregator>,
    healing: Arc<SelfHealingOrchestrator>,
}

impl ScorePipeline {
    async fn process(&self, batch: Vec<Interaction>) {
        let batch_len = batch.len();
        match self.reporter.submit_batch(&batch).await {
            Ok(results) => {
                let mut snapshot: Option<HealthSnapshot> = None;
                for result in &results {
                    snapshot = Some(self.health.record(result));
                }
                if let Some(snapshot) = snapshot {
                    debug!(
                        average = ?snapshot.average_score,
                        status = %snapshot.status,
                        trend = %snapshot.trend,
                        "health window updated"
                    );
                    let healing = self.healing.clone();
                    tokio::spawn(async move {
                        healing
                            .evaluate(snapshot.status, snapshot.average_score)
                            .await;
                    });
                }
            }
            Err(err) => {
                metrics::increment_counter!("agent_monitor_batches_dropped_total");
                warn!(
                    batch_len,
                    error = %err,
                    "dropping batch after exhausted retries"
                );
            }
        }
    }
}

/// Drop-in monitor around an inference function. Each instance owns its own
/// sampling state, health window, healing state and background worker; there
/// is no process-wide shared state.
///
/// Must be constructed inside a Tokio runtime: the flush ticker, the health
/// poll loop and (in async mode) the report worker are spawned on creation.
pub struct AgentMonitor {
    config: MonitorConfig,
    model: Arc<dyn InferenceModel>,
    backend: Arc<dyn ScoringBackend>,
    clock: Arc<dyn Clock>,
    sampling: SamplingGate,
    batch: Arc<BatchBuffer>,
    health: Arc<HealthAggregator>,
    healing: Arc<SelfHealingOrchestrator>,
    pipeline: ScorePipeline,
    system_prompt: Arc<RwLock<Option<String>>>,
    interaction_count: AtomicU64,
    job_tx: Mutex<Option<mpsc::Sender<Vec<Interaction>>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AgentMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMonitor")
            .field("config", &self.config)
            .field(
                "interaction_count",
                &self.interaction_count.load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl AgentMonitor {
    pub fn new(
        config: MonitorConfig,
        model: Arc<dyn InferenceModel>,
        backend: Arc<dyn ScoringBackend>,
    ) -> Result<Self> {
        Self::with_clock(config, model, backend, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: MonitorConfig,
        model: Arc<dyn InferenceModel>,
        backend: Arc<dyn ScoringBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let sampling = SamplingGate::new(
            config.sampling_rate,
            config.enhanced_multiplier,
            config.performance_threshold,
            config.max_daily_samples,
            config.sampling_window,
            clock.clone(),
        );
        let batch = Arc::new(BatchBuffer::new(
            config.batch_size,
            config.batch_max_age,
            clock.clone(),
        ));
        let reporter = Arc::new(QualityReporter::new(
            backend.clone(),
            config.agent_id.clone(),
            config.tool.clone(),
            config.use_case.clone(),
            config.report_timeout,
            config.retry.clone(),
        ));
        let health = Arc::new(HealthAggregator::new(config.health_window));
        let system_prompt = Arc::new(RwLock::new(None));
        let healing = Arc::new(SelfHealingOrchestrator::new(
            backend.clone(),
            config.agent_id.clone(),
            config.auto_healing,
            config.performance_threshold,
            config.healing_cooldown,
            config.healing_check_interval,
            clock.clone(),
            system_prompt.clone(),
        ));
        let pipeline = ScorePipeline {
            reporter,
            health: health.clone(),
            healing: healing.clone(),
        };

        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();

        let job_tx = if config.report_async {
            let (tx, rx) = mpsc::channel::<Vec<Interaction>>(config.queue_capacity);
            tasks.push(Self::spawn_report_worker(rx, pipeline.clone()));
            Some(tx)
        } else {
            None
        };

        let monitor = Self {
            model,
            backend,
            clock,
            sampling,
            batch,
            health,
            healing,
            pipeline,
            system_prompt,
            interaction_count: AtomicU64::new(0),
            job_tx: Mutex::new(job_tx),
            shutdown_tx,
            tasks: Mutex::new(tasks),
            config,
        };
        monitor.spawn_flush_ticker();
        monitor.spawn_health_poll();

        info!(agent_id = %monitor.config.agent_id, "agent monitor initialized");
        Ok(monitor)
    }

    /// Generate a response and monitor the interaction.
    ///
    /// The response is always returned to the caller first in spirit: only
    /// the model's own failure propagates, and with async reporting enabled
    /// the monitoring path adds no latency beyond a sampling decision.
    #[instrument(name = "monitored_generate", skip(self, prompt), fields(agent_id = %self.config.agent_id))]
    pub async fn generate_response(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let response = self.model.generate(prompt).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        self.observe(prompt, &response, latency_ms).await;

        Ok(response)
    }

    /// Monitoring tail of a served call. Never fails, never panics.
    async fn observe(&self, prompt: &str, response: &str, latency_ms: u64) {
        metrics::increment_counter!("agent_monitor_interactions_total");
        metrics::histogram!("agent_monitor_response_latency_ms", latency_ms as f64);

        let count = self.interaction_count.fetch_add(1, Ordering::Relaxed) + 1;

        if self.should_sample() {
            metrics::increment_counter!("agent_monitor_sampled_total");
            let interaction =
                Interaction::new(prompt, response, latency_ms, self.clock.now(), true);
            if let Some(batch) = self.batch.append(interaction) {
                self.dispatch(batch).await;
            }
        }

        if self.config.healing_check_every > 0 && count % self.config.healing_check_every == 0 {
            let snapshot = self.health.snapshot();
            let healing = self.healing.clone();
            tokio::spawn(async move {
                healing
                    .evaluate(snapshot.status, snapshot.average_score)
                    .await;
            });
        }
    }

    fn should_sample(&self) -> bool {
        if !self.config.enable_sampling {
            return true;
        }
        self.sampling.decide(self.health.last_average())
    }

    /// Hand a flushed batch to the reporting path. Async mode enqueues for
    /// the worker (dropping if the bounded queue is full); sync mode reports
    /// inline, bounded by the configured timeout and retry policy.
    async fn dispatch(&self, batch: Vec<Interaction>) {
        metrics::increment_counter!("agent_monitor_batches_flushed_total");
        let tx = self.job_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.try_send(batch).is_err() {
                    metrics::increment_counter!("agent_monitor_batches_dropped_total");
                    warn!("reporting queue full or closed, dropping batch");
                }
            }
            None => self.pipeline.process(batch).await,
        }
    }

    /// Flush any buffered interactions immediately, regardless of age.
    pub async fn force_flush(&self) {
        let pending = self.batch.drain();
        if !pending.is_empty() {
            self.dispatch(pending).await;
        }
    }

    /// Stop background tasks, drain the reporting queue, and flush whatever
    /// is still buffered as a single best-effort attempt with no retry.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        // Closing the channel lets the worker drain the queue and exit.
        let tx = self.job_tx.lock().unwrap().take();
        drop(tx);

        let remaining = self.batch.drain();
        if !remaining.is_empty() {
            match self.pipeline.reporter.submit_batch_once(&remaining).await {
                Ok(results) => {
                    for result in &results {
                        self.health.record(result);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "best-effort shutdown flush failed");
                }
            }
        }

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!(agent_id = %self.config.agent_id, "agent monitor stopped");
    }

    /// Current rolling health view.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn healing_state(&self) -> HealingState {
        self.healing.state()
    }

    /// Prompt applied by the most recent auto heal, if any.
    pub fn system_prompt(&self) -> Option<String> {
        self.system_prompt.read().unwrap().clone()
    }

    /// Recommendation recorded by the most recent suggest heal, if any.
    pub fn last_suggestion(&self) -> Option<String> {
        self.healing.last_suggestion()
    }

    pub fn interaction_count(&self) -> u64 {
        self.interaction_count.load(Ordering::Relaxed)
    }

    /// Sampled count within the current sampling window.
    pub fn sampled_in_window(&self) -> u32 {
        self.sampling.window_count()
    }

    /// Server-side health view for this agent.
    pub async fn backend_health(&self) -> Result<AgentHealth> {
        self.backend.get_health(&self.config.agent_id).await
    }

    fn spawn_report_worker(
        mut rx: mpsc::Receiver<Vec<Interaction>>,
        pipeline: ScorePipeline,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                pipeline.process(batch).await;
            }
            debug!("report worker drained and stopped");
        })
    }

    fn spawn_flush_ticker(&self) {
        let batch = self.batch.clone();
        let pipeline = self.pipeline.clone();
        let tx = self.job_tx.lock().unwrap().clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let tick = stale_probe_period(self.config.batch_max_age);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Some(stale) = batch.take_if_stale() {
                            metrics::increment_counter!("agent_monitor_batches_flushed_total");
                            match &tx {
                                Some(tx) => {
                                    if tx.try_send(stale).is_err() {
                                        metrics::increment_counter!("agent_monitor_batches_dropped_total");
                                        warn!("reporting queue full or closed, dropping stale batch");
                                    }
                                }
                                None => pipeline.process(stale).await,
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    fn spawn_health_poll(&self) {
        let backend = self.backend.clone();
        let healing = self.healing.clone();
        let agent_id = self.config.agent_id.clone();
        let period = self.config.healing_check_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so an idle agent is
            // polled one full period after startup.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match backend.get_health(&agent_id).await {
                            Ok(health) => {
                                healing
                                    .evaluate(health.status, Some(health.average_score))
                                    .await;
                            }
                            Err(err) => {
                                debug!(agent_id = %agent_id, error = %err, "health poll failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }
}

/// How often the ticker probes for a stale batch.
fn stale_probe_period(max_age: Duration) -> Duration {
    (max_age / 4).max(Duration::from_millis(250))
}
