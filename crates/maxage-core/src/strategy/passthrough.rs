use std::time::{Duration, Instant};

use tracing::info;

use super::EstimationStrategy;
use crate::error::EstimationError;
use crate::history::KeyHistory;

/// Never expresses an opinion; caching is left to downstream policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passthrough {
    default_interval: Duration,
}

impl Passthrough {
    pub fn new(default_interval: Duration) -> Self {
        Self { default_interval }
    }
}

impl EstimationStrategy for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn initialize(&mut self) -> Result<(), EstimationError> {
        info!("Using passthrough strategy, no cache-control headers will be attached");
        Ok(())
    }

    fn determine_interval(&self, _history: &KeyHistory) -> Result<Duration, EstimationError> {
        Ok(self.default_interval)
    }

    fn determine_estimation(
        &self,
        _history: &KeyHistory,
        _current_interval: Option<Duration>,
        _now: Instant,
    ) -> Result<Option<Duration>, EstimationError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryLimits, Verification};

    #[test]
    fn test_passthrough_has_no_opinion() {
        let strategy = Passthrough::new(Duration::from_secs(5));
        let mut history = KeyHistory::default();
        let now = Instant::now();
        assert_eq!(strategy.determine_estimation(&history, None, now).unwrap(), None);

        history.push_verification(Verification { timestamp: now, changed: true }, HistoryLimits::default());
        assert_eq!(
            strategy.determine_estimation(&history, Some(Duration::from_secs(1)), now).unwrap(),
            None
        );
        assert_eq!(strategy.determine_interval(&history).unwrap(), Duration::from_secs(5));
    }
}
