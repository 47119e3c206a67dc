use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::constants::STALE_COOLDOWN_FACTOR;

/// One draw per cooldown window per client, no burst credit.
#[derive(Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    last_draw: Mutex<HashMap<Uuid, Instant>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_draw: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time left before `client` may draw again, or `None` if it may draw now.
    pub fn remaining(&self, client: &Uuid) -> Option<Duration> {
        let last_draw = self.last_draw.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = last_draw.get(client)?.elapsed();
        self.cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    pub fn can_draw(&self, client: &Uuid) -> bool {
        self.remaining(client).is_none()
    }

    /// Starts a new cooldown window for `client`. Only call this once the draw
    /// has been committed to the canvas.
    pub fn record_draw(&self, client: Uuid) -> Instant {
        let now = Instant::now();
        self.last_draw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client, now);
        now
    }

    /// Drops every record older than [`STALE_COOLDOWN_FACTOR`] cooldown
    /// windows. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let stale_after = self.cooldown * STALE_COOLDOWN_FACTOR;
        let mut last_draw = self.last_draw.lock().unwrap_or_else(PoisonError::into_inner);
        let before = last_draw.len();
        last_draw.retain(|_, drawn_at| now.saturating_duration_since(*drawn_at) <= stale_after);
        let removed = before - last_draw.len();

        debug!(
            "Cooldown sweep removed {} stale records, {} remain",
            removed,
            last_draw.len()
        );
        removed
    }

    pub fn tracked_clients(&self) -> usize {
        self.last_draw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
