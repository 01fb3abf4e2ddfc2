use crate::config::ReconnectPolicy;
use std::time::Duration;

/// Stateful exponential backoff driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
        }
    }

    /// Delay to wait before the next attempt; grows the delay for the attempt after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.policy.max);
        self.current = self
            .current
            .saturating_mul(self.policy.multiplier.max(1))
            .min(self.policy.max);
        delay
    }

    /// Return to the initial delay after a successful subscription.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}
