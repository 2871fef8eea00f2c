//! Scale-up cooldown tracking.
//!
//! After a deployment scales up, scale-downs are held back for a cooldown
//! period so a partially subsided spike does not immediately undo the
//! scale-up on the next sample.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DEFAULT_SCALE_UP_COOLDOWN;

/// Remembers the last scale-up per deployment.
#[derive(Debug)]
pub struct CooldownPolicy {
    cooldown: Duration,
    last_scale_up: HashMap<String, Instant>,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE_UP_COOLDOWN)
    }
}

impl CooldownPolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_scale_up: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn record_scale_up(&mut self, deployment_id: &str, at: Instant) {
        self.last_scale_up.insert(deployment_id.to_string(), at);
    }

    /// False iff a scale-up was recorded less than `cooldown` before `now`.
    pub fn can_scale_down_within(
        &self,
        deployment_id: &str,
        now: Instant,
        cooldown: Duration,
    ) -> bool {
        match self.last_scale_up.get(deployment_id) {
            Some(&last) => now.saturating_duration_since(last) >= cooldown,
            None => true,
        }
    }

    /// [`can_scale_down_within`](Self::can_scale_down_within) using the configured cooldown.
    pub fn can_scale_down(&self, deployment_id: &str, now: Instant) -> bool {
        self.can_scale_down_within(deployment_id, now, self.cooldown)
    }

    pub fn last_scale_up(&self, deployment_id: &str) -> Option<Instant> {
        self.last_scale_up.get(deployment_id).copied()
    }

    /// Drop the history of a deployment that is no longer tracked.
    pub fn forget(&mut self, deployment_id: &str) {
        self.last_scale_up.remove(deployment_id);
    }
}
