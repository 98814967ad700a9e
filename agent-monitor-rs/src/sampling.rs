// agent-monitor-rs/src/sampling.rs
// Sampling decision engine: per-call probabilistic sampling under a hard
// per-window budget. Enhanced sampling raises the effective rate while the
// rolling average score sits below the performance threshold, but the
// window budget stays a hard ceiling either way.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::clock::Clock;
use crate::config::SamplingWindow;

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SamplingGate {
    base_rate: f64,
    enhanced_multiplier: f64,
    performance_threshold: f64,
    max_daily_samples: u32,
    window: SamplingWindow,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

impl SamplingGate {
    pub fn new(
        base_rate: f64,
        enhanced_multiplier: f64,
        performance_threshold: f64,
        max_daily_samples: u32,
        window: SamplingWindow,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window_start = clock.now();
        Self {
            base_rate,
            enhanced_multiplier,
            performance_threshold,
            max_daily_samples,
            window,
            clock,
            state: Mutex::new(WindowState {
                count: 0,
                window_start,
            }),
        }
    }

    /// Decide whether the current interaction is sampled.
    ///
    /// `last_average_score` is the most recent rolling average from the
    /// health aggregator, if any scores have arrived yet.
    pub fn decide(&self, last_average_score: Option<f64>) -> bool {
        // A zero budget means "never sample", regardless of rates.
        if self.max_daily_samples == 0 {
            return false;
        }
        // Full monitoring bypasses the engine: no draw, no counting.
        if self.base_rate >= 1.0 {
            return true;
        }

        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();

        if self.window_elapsed(&state, now) {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.max_daily_samples {
            return false;
        }

        let mut rate = self.base_rate;
        if let Some(average) = last_average_score {
            if average < self.performance_threshold {
                rate = (rate * self.enhanced_multiplier).min(1.0);
            }
        }

        let draw: f64 = rand::thread_rng().gen();
        if draw < rate {
            state.count += 1;
            true
        } else {
            false
        }
    }

    /// Sampled count within the current window.
    pub fn window_count(&self) -> u32 {
        self.state.lock().unwrap().count
    }

    fn window_elapsed(&self, state: &WindowState, now: DateTime<Utc>) -> bool {
        match self.window {
            SamplingWindow::Daily => now.date_naive() != state.window_start.date_naive(),
            SamplingWindow::Interval(interval) => {
                let elapsed = now.signed_duration_since(state.window_start);
                elapsed >= chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX)
            }
        }
    }
}
