use std::time::{Duration, Instant};

use tracing::info;

use super::EstimationStrategy;
use crate::error::EstimationError;
use crate::history::KeyHistory;

/// Always recommends the same, externally configured TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticTtl {
    ttl: Duration,
    default_interval: Duration,
}

impl StaticTtl {
    pub fn new(ttl: Duration, default_interval: Duration) -> Self {
        Self { ttl, default_interval }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl EstimationStrategy for StaticTtl {
    fn name(&self) -> &str {
        "static"
    }

    fn initialize(&mut self) -> Result<(), EstimationError> {
        info!(max_age_secs = self.ttl.as_secs(), "Using static strategy");
        Ok(())
    }

    // The value never changes, so the interval only paces bookkeeping.
    fn determine_interval(&self, _history: &KeyHistory) -> Result<Duration, EstimationError> {
        Ok(self.default_interval)
    }

    fn determine_estimation(
        &self,
        _history: &KeyHistory,
        _current_interval: Option<Duration>,
        _now: Instant,
    ) -> Result<Option<Duration>, EstimationError> {
        Ok(Some(self.ttl))
    }
}
