// agent-monitor-rs/src/health.rs
// Rolling health signal over the most recent quality scores.
//
// Status thresholds: average < 60 is critical, < 75 is warning, otherwise
// healthy. When the trend is declining, the second half of the window is
// classified as well and the worse judgment wins, so stale high scores
// cannot mask a collapse.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::backend::{FeedbackResult, HealthStatus};

const CRITICAL_THRESHOLD: f64 = 60.0;
const WARNING_THRESHOLD: f64 = 75.0;
/// Minimum half-window mean difference, in score points, to call a trend.
const TREND_EPSILON: f64 = 1.0;

/// Direction of recent score movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreTrend {
    Improving,
    Stable,
    Declining,
}

impl std::fmt::Display for ScoreTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreTrend::Improving => write!(f, "improving"),
            ScoreTrend::Stable => write!(f, "stable"),
            ScoreTrend::Declining => write!(f, "declining"),
        }
    }
}

/// Point-in-time view of the rolling window. Read-only to every component
/// other than the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub average_score: Option<f64>,
    pub trend: ScoreTrend,
    pub status: HealthStatus,
    pub recent_issues: Vec<String>,
    pub scored_interactions: usize,
}

impl HealthSnapshot {
    fn empty() -> Self {
        Self {
            average_score: None,
            trend: ScoreTrend::Stable,
            status: HealthStatus::Healthy,
            recent_issues: Vec::new(),
            scored_interactions: 0,
        }
    }
}

#[derive(Debug)]
struct Window {
    scores: VecDeque<f64>,
    issues: VecDeque<String>,
    snapshot: HealthSnapshot,
}

#[derive(Debug)]
pub struct HealthAggregator {
    window: usize,
    inner: Mutex<Window>,
}

impl HealthAggregator {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            inner: Mutex::new(Window {
                scores: VecDeque::with_capacity(window),
                issues: VecDeque::with_capacity(window),
                snapshot: HealthSnapshot::empty(),
            }),
        }
    }

    /// Fold a new scored interaction into the window and recompute the
    /// snapshot.
    pub fn record(&self, result: &FeedbackResult) -> HealthSnapshot {
        let mut inner = self.inner.lock().unwrap();
        if inner.scores.len() == self.window {
            inner.scores.pop_front();
        }
        inner.scores.push_back(result.score);

        if let Some(issue) = result.issue.as_deref().filter(|i| !i.trim().is_empty()) {
            if inner.issues.len() == self.window {
                inner.issues.pop_front();
            }
            inner.issues.push_back(issue.to_string());
        }

        inner.snapshot = Self::recompute(&inner.scores, &inner.issues);
        inner.snapshot.clone()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.inner.lock().unwrap().snapshot.clone()
    }

    /// Most recent rolling average, if any scores have arrived.
    pub fn last_average(&self) -> Option<f64> {
        self.inner.lock().unwrap().snapshot.average_score
    }

    fn recompute(scores: &VecDeque<f64>, issues: &VecDeque<String>) -> HealthSnapshot {
        if scores.is_empty() {
            return HealthSnapshot::empty();
        }

        let scores: Vec<f64> = scores.iter().copied().collect();
        let average = mean(&scores);
        let trend = Self::trend(&scores);

        let mut status = classify(average);
        if trend == ScoreTrend::Declining {
            // Judge the recent half on its own; the worse verdict wins.
            let half = scores.len() / 2;
            let recent = classify(mean(&scores[scores.len() - half..]));
            status = worse(status, recent);
        }

        HealthSnapshot {
            average_score: Some(average),
            trend,
            status,
            recent_issues: issues.iter().rev().cloned().collect(),
            scored_interactions: scores.len(),
        }
    }

    fn trend(scores: &[f64]) -> ScoreTrend {
        let half = scores.len() / 2;
        if half == 0 {
            return ScoreTrend::Stable;
        }
        // Odd windows leave the middle element out of both halves.
        let first = mean(&scores[..half]);
        let second = mean(&scores[scores.len() - half..]);
        if second > first + TREND_EPSILON {
            ScoreTrend::Improving
        } else if second < first - TREND_EPSILON {
            ScoreTrend::Declining
        } else {
            ScoreTrend::Stable
        }
    }
}

fn mean(scores: &[f64]) -> f64 {
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn classify(average: f64) -> HealthStatus {
    if average < CRITICAL_THRESHOLD {
        HealthStatus::Critical
    } else if average < WARNING_THRESHOLD {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

fn worse(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    use HealthStatus::*;
    match (a, b) {
        (Critical, _) | (_, Critical) => Critical,
        (Warning, _) | (_, Warning) => Warning,
        _ => Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn score(value: f64) -> FeedbackResult {
        FeedbackResult {
            score: value,
            issue: None,
            feedback_id: "fb".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn feed(aggregator: &HealthAggregator, values: &[f64]) -> HealthSnapshot {
        let mut last = aggregator.snapshot();
        for v in values {
            last = aggregator.record(&score(*v));
        }
        last
    }

    #[test]
    fn empty_window_is_healthy_and_stable() {
        let snapshot = HealthAggregator::new(10).snapshot();
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.trend, ScoreTrend::Stable);
        assert!(snapshot.average_score.is_none());
    }

    #[test]
    fn collapsing_scores_go_critical_and_declining() {
        let snapshot = feed(&HealthAggregator::new(5), &[90.0, 88.0, 85.0, 40.0, 35.0]);
        assert_eq!(snapshot.status, HealthStatus::Critical);
        assert_eq!(snapshot.trend, ScoreTrend::Declining);
    }

    #[test]
    fn steady_high_scores_are_healthy() {
        let snapshot = feed(&HealthAggregator::new(10), &[92.0, 88.0, 90.0, 91.0]);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.trend, ScoreTrend::Stable);
    }

    #[test]
    fn mid_scores_are_warning() {
        let snapshot = feed(&HealthAggregator::new(10), &[70.0, 68.0, 72.0, 71.0]);
        assert_eq!(snapshot.status, HealthStatus::Warning);
    }

    #[test]
    fn low_scores_are_critical() {
        let snapshot = feed(&HealthAggregator::new(10), &[55.0, 50.0, 58.0, 52.0]);
        assert_eq!(snapshot.status, HealthStatus::Critical);
    }

    #[test]
    fn recovering_scores_trend_improving() {
        let snapshot = feed(&HealthAggregator::new(6), &[50.0, 55.0, 60.0, 80.0, 85.0, 90.0]);
        assert_eq!(snapshot.trend, ScoreTrend::Improving);
    }

    #[test]
    fn window_evicts_oldest_scores() {
        let aggregator = HealthAggregator::new(3);
        feed(&aggregator, &[10.0, 10.0, 10.0, 90.0, 90.0, 90.0]);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.average_score, Some(90.0));
        assert_eq!(snapshot.scored_interactions, 3);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
    }

    #[test]
    fn issue_tags_are_collected_newest_first() {
        let aggregator = HealthAggregator::new(5);
        aggregator.record(&FeedbackResult {
            score: 80.0,
            issue: Some("tone".to_string()),
            feedback_id: "fb-1".to_string(),
            timestamp: Utc::now(),
        });
        aggregator.record(&FeedbackResult {
            score: 78.0,
            issue: Some("format".to_string()),
            feedback_id: "fb-2".to_string(),
            timestamp: Utc::now(),
        });
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.recent_issues, vec!["format", "tone"]);
    }
}
