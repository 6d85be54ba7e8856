use std::time::Duration;

/// Reconciler configuration: per-step timeouts and controller tuning.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Timeout reqwest applies to the outbound call, connect through body.
    pub request_timeout: Duration,
    /// Upper bound on the whole act step, including body draining.
    pub action_timeout: Duration,
    /// Upper bound on each store round-trip.
    pub store_timeout: Duration,
    /// Passes the controller runs at once across distinct resources.
    pub concurrency: usize,
    /// Redeliveries of a retryable failure before the controller gives up.
    pub max_requeues: u32,
    pub requeue_backoff: Duration,
    pub max_requeue_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            action_timeout: Duration::from_secs(35),
            store_timeout: Duration::from_secs(10),
            concurrency: 8,
            max_requeues: 5,
            requeue_backoff: Duration::from_millis(500),
            max_requeue_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconcilerConfig {
    /// Exponential backoff for the given attempt (1-based), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.requeue_backoff
            .saturating_mul(factor)
            .min(self.max_requeue_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = ReconcilerConfig {
            requeue_backoff: Duration::from_millis(100),
            max_requeue_backoff: Duration::from_millis(350),
            ..ReconcilerConfig::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
        assert_eq!(config.backoff_for(40), Duration::from_millis(350));
    }
}
