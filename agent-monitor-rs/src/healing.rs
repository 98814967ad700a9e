// agent-monitor-rs/src/healing.rs
// Two-phase self-healing state machine: scan, then heal. A heal is only
// ever attempted from a locally cached Flagged state, and a cached flag
// that did not come from the current cycle's scan is re-verified against
// the backend first. At most one cycle runs at a time per agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::backend::{HealStrategy, HealthStatus, ScoringBackend};
use crate::clock::Clock;

/// Per-agent healing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealingState {
    NotFlagged,
    Flagged,
    Healing,
    Healed { healed_at: DateTime<Utc> },
    Failed { failed_at: DateTime<Utc> },
}

#[derive(Debug)]
pub struct SelfHealingOrchestrator {
    backend: Arc<dyn ScoringBackend>,
    agent_id: String,
    strategy: HealStrategy,
    performance_threshold: f64,
    cooldown: Duration,
    /// Minimum spacing between cycle starts; keeps a Failed heal from being
    /// retried immediately on the next score.
    cycle_interval: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<HealingState>,
    last_cycle_started: Mutex<Option<DateTime<Utc>>>,
    in_flight: AtomicBool,
    system_prompt: Arc<RwLock<Option<String>>>,
    last_suggestion: Mutex<Option<String>>,
}

/// Clears the in-flight marker on every exit path of a cycle.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SelfHealingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn ScoringBackend>,
        agent_id: String,
        auto_healing: bool,
        performance_threshold: f64,
        cooldown: Duration,
        cycle_interval: Duration,
        clock: Arc<dyn Clock>,
        system_prompt: Arc<RwLock<Option<String>>>,
    ) -> Self {
        let strategy = if auto_healing {
            HealStrategy::Auto
        } else {
            HealStrategy::Suggest
        };
        Self {
            backend,
            agent_id,
            strategy,
            performance_threshold,
            cooldown,
            cycle_interval,
            clock,
            state: Mutex::new(HealingState::NotFlagged),
            last_cycle_started: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            system_prompt,
            last_suggestion: Mutex::new(None),
        }
    }

    pub fn state(&self) -> HealingState {
        *self.state.lock().unwrap()
    }

    /// Recommendation recorded by the most recent suggest-strategy heal.
    pub fn last_suggestion(&self) -> Option<String> {
        self.last_suggestion.lock().unwrap().clone()
    }

    /// Re-evaluate the healing lifecycle against the latest health signal.
    /// Never blocks the serving path and never propagates an error;
    /// concurrent callers collapse into the single in-flight cycle.
    #[instrument(name = "self_healing_evaluate", skip(self), fields(agent_id = %self.agent_id))]
    pub async fn evaluate(&self, status: HealthStatus, average_score: Option<f64>) {
        if !status.needs_healing() {
            self.try_rearm(average_score);
            return;
        }

        if !self.cycle_due() {
            return;
        }

        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("heal cycle already in flight, collapsing trigger");
            return;
        }
        let _guard = InFlightGuard(&self.in_flight);

        *self.last_cycle_started.lock().unwrap() = Some(self.clock.now());
        self.run_cycle().await;
    }

    /// Healed agents re-arm once health is back above the threshold and the
    /// cool-down has elapsed.
    fn try_rearm(&self, average_score: Option<f64>) {
        let mut state = self.state.lock().unwrap();
        if let HealingState::Healed { healed_at } = *state {
            let recovered = average_score.map_or(true, |avg| avg >= self.performance_threshold);
            let rested = self.clock.now().signed_duration_since(healed_at)
                >= chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX);
            if recovered && rested {
                *state = HealingState::NotFlagged;
                info!(agent_id = %self.agent_id, "agent recovered, healing re-armed");
            }
        }
    }

    fn cycle_due(&self) -> bool {
        let last = *self.last_cycle_started.lock().unwrap();
        match last {
            None => true,
            Some(started) => {
                self.clock.now().signed_duration_since(started)
                    >= chrono::Duration::from_std(self.cycle_interval)
                        .unwrap_or(chrono::Duration::MAX)
            }
        }
    }

    async fn run_cycle(&self) {
        let entry = self.state();
        let flagged_by_this_cycle = match entry {
            HealingState::Healing => return,
            HealingState::Healed { healed_at } => {
                let rested = self.clock.now().signed_duration_since(healed_at)
                    >= chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX);
                if !rested {
                    debug!("healed agent still in cool-down, skipping cycle");
                    return;
                }
                if !self.scan().await {
                    return;
                }
                true
            }
            HealingState::NotFlagged | HealingState::Failed { .. } => {
                if !self.scan().await {
                    return;
                }
                true
            }
            // A flag cached from an earlier, interrupted cycle.
            HealingState::Flagged => false,
        };

        if !flagged_by_this_cycle && !self.confirm_cached_flag().await {
            return;
        }

        self.heal().await;
    }

    /// Scan phase: ask the backend to evaluate agents. The local state moves
    /// to Flagged only if the scan response names this agent.
    async fn scan(&self) -> bool {
        metrics::increment_counter!("agent_monitor_scan_cycles_total");
        match self.backend.trigger_scan().await {
            Ok(outcome) => {
                if outcome.flags(&self.agent_id) {
                    *self.state.lock().unwrap() = HealingState::Flagged;
                    info!(
                        agent_id = %self.agent_id,
                        scanned = outcome.total_agents_scanned,
                        "scan flagged agent for healing"
                    );
                    true
                } else {
                    debug!(
                        agent_id = %self.agent_id,
                        scanned = outcome.total_agents_scanned,
                        "scan did not flag this agent"
                    );
                    false
                }
            }
            Err(err) => {
                warn!(agent_id = %self.agent_id, error = %err, "self-healing scan failed");
                false
            }
        }
    }

    /// A Flagged state that predates this cycle may be stale; confirm with
    /// the backend before healing, and clear it if the agent is no longer
    /// unhealthy.
    async fn confirm_cached_flag(&self) -> bool {
        match self.backend.get_health(&self.agent_id).await {
            Ok(health) if health.status.needs_healing() => true,
            Ok(health) => {
                *self.state.lock().unwrap() = HealingState::NotFlagged;
                info!(
                    agent_id = %self.agent_id,
                    status = %health.status,
                    "cached flag was stale, cleared without healing"
                );
                false
            }
            Err(err) => {
                warn!(
                    agent_id = %self.agent_id,
                    error = %err,
                    "could not confirm cached flag, skipping heal"
                );
                false
            }
        }
    }

    /// Heal phase. Only reachable while the local state is Flagged.
    async fn heal(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != HealingState::Flagged {
                return;
            }
            *state = HealingState::Healing;
        }

        match self.backend.heal_agent(&self.agent_id, self.strategy).await {
            Ok(outcome) => {
                if self.strategy == HealStrategy::Auto {
                    if let Some(prompt) = outcome.applied_prompt {
                        *self.system_prompt.write().unwrap() = Some(prompt);
                        info!(agent_id = %self.agent_id, "improved prompt applied");
                    }
                }
                if let Some(suggestion) = outcome.suggestion {
                    *self.last_suggestion.lock().unwrap() = Some(suggestion);
                }
                *self.state.lock().unwrap() = HealingState::Healed {
                    healed_at: self.clock.now(),
                };
                metrics::increment_counter!("agent_monitor_heals_total", "outcome" => "success");
                info!(agent_id = %self.agent_id, strategy = self.strategy.as_str(), "heal succeeded");
            }
            Err(err) => {
                // Includes a backend invalid-state rejection: logged, never
                // surfaced to the serving path.
                *self.state.lock().unwrap() = HealingState::Failed {
                    failed_at: self.clock.now(),
                };
                metrics::increment_counter!("agent_monitor_heals_total", "outcome" => "failure");
                warn!(
                    agent_id = %self.agent_id,
                    error = %err,
                    "heal failed, will retry on a later scan cycle"
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: HealingState) {
        *self.state.lock().unwrap() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AgentHealth, FeedbackResult, FeedbackSubmission, HealOutcome, ScanOutcome,
    };
    use crate::clock::ManualClock;
    use crate::error::{MonitorError, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    /// Scripted backend: counts calls, flags on demand, heals on demand.
    #[derive(Debug)]
    struct ScriptedBackend {
        flag_agent: AtomicBool,
        heal_ok: AtomicBool,
        health_status: Mutex<HealthStatus>,
        scans: AtomicU32,
        heals: AtomicU32,
        health_queries: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(flag_agent: bool, heal_ok: bool) -> Self {
            Self {
                flag_agent: AtomicBool::new(flag_agent),
                heal_ok: AtomicBool::new(heal_ok),
                health_status: Mutex::new(HealthStatus::Warning),
                scans: AtomicU32::new(0),
                heals: AtomicU32::new(0),
                health_queries: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ScoringBackend for ScriptedBackend {
        async fn submit_feedback(
            &self,
            _submission: FeedbackSubmission<'_>,
        ) -> Result<FeedbackResult> {
            unimplemented!("not used in healing tests")
        }

        async fn get_health(&self, _agent_id: &str) -> Result<AgentHealth> {
            self.health_queries.fetch_add(1, Ordering::SeqCst);
            Ok(AgentHealth {
                status: *self.health_status.lock().unwrap(),
                average_score: 55.0,
                total_interactions: 42,
            })
        }

        async fn trigger_scan(&self) -> Result<ScanOutcome> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            let flagged = if self.flag_agent.load(Ordering::SeqCst) {
                vec!["agent-1".to_string()]
            } else {
                vec![]
            };
            Ok(ScanOutcome {
                total_agents_scanned: 3,
                agents_flagged: flagged,
            })
        }

        async fn heal_agent(
            &self,
            _agent_id: &str,
            strategy: HealStrategy,
        ) -> Result<HealOutcome> {
            self.heals.fetch_add(1, Ordering::SeqCst);
            if self.heal_ok.load(Ordering::SeqCst) {
                Ok(match strategy {
                    HealStrategy::Auto => HealOutcome {
                        applied_prompt: Some("improved prompt".to_string()),
                        suggestion: None,
                    },
                    HealStrategy::Suggest => HealOutcome {
                        applied_prompt: None,
                        suggestion: Some("consider tightening the tone".to_string()),
                    },
                })
            } else {
                Err(MonitorError::Transport("backend unavailable".into()))
            }
        }
    }

    struct Fixture {
        backend: Arc<ScriptedBackend>,
        orchestrator: SelfHealingOrchestrator,
        prompt: Arc<RwLock<Option<String>>>,
        clock: Arc<ManualClock>,
    }

    fn fixture(backend: ScriptedBackend, auto_healing: bool) -> Fixture {
        let backend = Arc::new(backend);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let prompt = Arc::new(RwLock::new(Some("original prompt".to_string())));
        let orchestrator = SelfHealingOrchestrator::new(
            backend.clone() as Arc<dyn ScoringBackend>,
            "agent-1".to_string(),
            auto_healing,
            75.0,
            Duration::from_secs(600),
            Duration::ZERO,
            clock.clone() as Arc<dyn Clock>,
            prompt.clone(),
        );
        Fixture {
            backend,
            orchestrator,
            prompt,
            clock,
        }
    }

    #[tokio::test]
    async fn healthy_status_triggers_nothing() {
        let f = fixture(ScriptedBackend::new(true, true), true);
        f.orchestrator.evaluate(HealthStatus::Healthy, Some(90.0)).await;
        assert_eq!(f.backend.scans.load(Ordering::SeqCst), 0);
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 0);
        assert_eq!(f.orchestrator.state(), HealingState::NotFlagged);
    }

    #[tokio::test]
    async fn scan_flag_then_heal_applies_prompt_in_auto_mode() {
        let f = fixture(ScriptedBackend::new(true, true), true);
        f.orchestrator.evaluate(HealthStatus::Critical, Some(40.0)).await;
        assert_eq!(f.backend.scans.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 1);
        assert!(matches!(f.orchestrator.state(), HealingState::Healed { .. }));
        assert_eq!(
            f.prompt.read().unwrap().as_deref(),
            Some("improved prompt")
        );
    }

    #[tokio::test]
    async fn suggest_strategy_never_mutates_the_prompt() {
        let f = fixture(ScriptedBackend::new(true, true), false);
        f.orchestrator.evaluate(HealthStatus::Warning, Some(70.0)).await;
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 1);
        assert_eq!(f.prompt.read().unwrap().as_deref(), Some("original prompt"));
        assert_eq!(
            f.orchestrator.last_suggestion().as_deref(),
            Some("consider tightening the tone")
        );
        assert!(matches!(f.orchestrator.state(), HealingState::Healed { .. }));
    }

    #[tokio::test]
    async fn unflagged_scan_never_reaches_heal() {
        let f = fixture(ScriptedBackend::new(false, true), true);
        f.orchestrator.evaluate(HealthStatus::Critical, Some(40.0)).await;
        assert_eq!(f.backend.scans.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 0);
        assert_eq!(f.orchestrator.state(), HealingState::NotFlagged);
    }

    #[tokio::test]
    async fn failed_heal_waits_for_a_later_cycle() {
        let backend = ScriptedBackend::new(true, false);
        let backend = Arc::new(backend);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let prompt = Arc::new(RwLock::new(None));
        let orchestrator = SelfHealingOrchestrator::new(
            backend.clone() as Arc<dyn ScoringBackend>,
            "agent-1".to_string(),
            true,
            75.0,
            Duration::from_secs(600),
            Duration::from_secs(300),
            clock.clone() as Arc<dyn Clock>,
            prompt,
        );

        orchestrator.evaluate(HealthStatus::Critical, Some(40.0)).await;
        assert!(matches!(orchestrator.state(), HealingState::Failed { .. }));
        assert_eq!(backend.heals.load(Ordering::SeqCst), 1);

        // Immediate re-trigger is paced out: no new scan, no new heal.
        orchestrator.evaluate(HealthStatus::Critical, Some(40.0)).await;
        assert_eq!(backend.scans.load(Ordering::SeqCst), 1);
        assert_eq!(backend.heals.load(Ordering::SeqCst), 1);

        // After the pacing interval a fresh scan cycle retries the heal.
        backend.heal_ok.store(true, Ordering::SeqCst);
        clock.advance(chrono::Duration::seconds(301));
        orchestrator.evaluate(HealthStatus::Critical, Some(40.0)).await;
        assert_eq!(backend.scans.load(Ordering::SeqCst), 2);
        assert_eq!(backend.heals.load(Ordering::SeqCst), 2);
        assert!(matches!(orchestrator.state(), HealingState::Healed { .. }));
    }

    #[tokio::test]
    async fn healed_agent_rests_through_the_cooldown_then_rearms() {
        let f = fixture(ScriptedBackend::new(true, true), true);
        f.orchestrator.evaluate(HealthStatus::Critical, Some(40.0)).await;
        assert!(matches!(f.orchestrator.state(), HealingState::Healed { .. }));

        // Still unhealthy inside the cool-down: no new cycle.
        f.orchestrator.evaluate(HealthStatus::Warning, Some(70.0)).await;
        assert_eq!(f.backend.scans.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 1);

        // Recovered but cool-down not elapsed: still Healed.
        f.orchestrator.evaluate(HealthStatus::Healthy, Some(85.0)).await;
        assert!(matches!(f.orchestrator.state(), HealingState::Healed { .. }));

        // Recovered and rested: re-armed.
        f.clock.advance(chrono::Duration::seconds(601));
        f.orchestrator.evaluate(HealthStatus::Healthy, Some(85.0)).await;
        assert_eq!(f.orchestrator.state(), HealingState::NotFlagged);
    }

    #[tokio::test]
    async fn stale_cached_flag_is_reverified_before_heal() {
        let f = fixture(ScriptedBackend::new(true, true), true);
        f.orchestrator.force_state(HealingState::Flagged);
        *f.backend.health_status.lock().unwrap() = HealthStatus::Healthy;

        f.orchestrator.evaluate(HealthStatus::Warning, Some(70.0)).await;

        // The cached flag was stale: re-queried, cleared, no scan, no heal.
        assert_eq!(f.backend.health_queries.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.scans.load(Ordering::SeqCst), 0);
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 0);
        assert_eq!(f.orchestrator.state(), HealingState::NotFlagged);
    }

    #[tokio::test]
    async fn confirmed_cached_flag_heals_without_rescanning() {
        let f = fixture(ScriptedBackend::new(true, true), true);
        f.orchestrator.force_state(HealingState::Flagged);

        f.orchestrator.evaluate(HealthStatus::Warning, Some(70.0)).await;

        assert_eq!(f.backend.health_queries.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.scans.load(Ordering::SeqCst), 0);
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 1);
        assert!(matches!(f.orchestrator.state(), HealingState::Healed { .. }));
    }

    #[tokio::test]
    async fn concurrent_triggers_collapse_into_one_cycle() {
        let f = fixture(ScriptedBackend::new(true, true), true);
        let orchestrator = Arc::new(f.orchestrator);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let orch = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                orch.evaluate(HealthStatus::Critical, Some(40.0)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Pacing is zero, so collapses come from the in-flight guard and the
        // Healed cool-down: exactly one scan and one heal.
        assert_eq!(f.backend.scans.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.heals.load(Ordering::SeqCst), 1);
    }
}
