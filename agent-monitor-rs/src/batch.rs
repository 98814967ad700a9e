// agent-monitor-rs/src/batch.rs
// Size/time-bounded buffer for sampled interactions. All flush triggers
// (size threshold, staleness probe, shutdown drain) swap the queue contents
// out under one lock, so a batch can only ever leave the buffer once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::interaction::Interaction;

#[derive(Debug)]
struct Inner {
    items: Vec<Interaction>,
    oldest_enqueued_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct BatchBuffer {
    batch_size: usize,
    max_age: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl BatchBuffer {
    pub fn new(batch_size: usize, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            batch_size,
            max_age,
            clock,
            inner: Mutex::new(Inner {
                items: Vec::new(),
                oldest_enqueued_at: None,
            }),
        }
    }

    /// Queue a sampled interaction. Returns the full batch when this append
    /// reaches the size threshold; the buffer is empty afterwards.
    pub fn append(&self, interaction: Interaction) -> Option<Vec<Interaction>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.is_empty() {
            inner.oldest_enqueued_at = Some(self.clock.now());
        }
        inner.items.push(interaction);
        if inner.items.len() >= self.batch_size {
            Some(Self::swap_out(&mut inner))
        } else {
            None
        }
    }

    /// Take the queued batch if the oldest item has exceeded the idle
    /// timeout. Called by the background flush ticker.
    pub fn take_if_stale(&self) -> Option<Vec<Interaction>> {
        let mut inner = self.inner.lock().unwrap();
        let oldest = inner.oldest_enqueued_at?;
        let age = self.clock.now().signed_duration_since(oldest);
        if age >= chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX) {
            Some(Self::swap_out(&mut inner))
        } else {
            None
        }
    }

    /// Take whatever is queued, regardless of age. Used for shutdown.
    pub fn drain(&self) -> Vec<Interaction> {
        let mut inner = self.inner.lock().unwrap();
        Self::swap_out(&mut inner)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn swap_out(inner: &mut Inner) -> Vec<Interaction> {
        inner.oldest_enqueued_at = None;
        std::mem::take(&mut inner.items)
    }
}
