//! Update-risk based TTL estimation.
//!
//! Follows Lee et al., "An Update-Risk Based Approach to TTL Estimation in Web
//! Caching" (WISE 2002, doi:10.1109/WISE.2002.1181640). Inter-change times
//! are modelled as exponential with rate `mu`, estimated from the last `K`
//! observed changes. The TTL is the time at which the probability of an
//! update having happened reaches the risk tolerance `rho`:
//!
//! ```text
//! t = -(1 / mu) * ln(1 - rho)
//! ```

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::EstimationStrategy;
use crate::error::EstimationError;
use crate::history::KeyHistory;

/// Number of recent changes used for the rate estimate when none is configured.
pub const DEFAULT_K: usize = 2;

/// Update rate assumed before any change has been observed.
const COLD_START_RATE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRisk {
    k: Option<usize>,
    rho: f64,
    default_interval: Duration,
}

impl UpdateRisk {
    /// Create the strategy. `k = None` selects [`DEFAULT_K`] on initialization.
    pub fn new(k: Option<usize>, rho: f64, default_interval: Duration) -> Self {
        Self { k, rho, default_interval }
    }

    pub fn k(&self) -> usize {
        self.k.unwrap_or(DEFAULT_K)
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    /// Check the parameters an operator may set explicitly.
    ///
    /// # Errors
    ///
    /// `K` must be positive when given, `rho` must lie strictly between 0 and 1
    /// and the interval floor must be non-zero.
    pub fn validate(
        k: Option<usize>,
        rho: f64,
        default_interval: Duration,
    ) -> Result<(), EstimationError> {
        if k == Some(0) {
            return Err(EstimationError::Configuration(
                "update-risk K must be a positive integer".to_string(),
            ));
        }
        if rho.is_nan() || rho <= 0.0 || rho >= 1.0 {
            return Err(EstimationError::Configuration(format!(
                "update-risk rho must lie in (0, 1), got {rho}"
            )));
        }
        if default_interval.is_zero() {
            return Err(EstimationError::Configuration(
                "default interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Observed changes per second over the last `K` changes.
    fn update_rate(&self, history: &KeyHistory, now: Instant) -> f64 {
        let changes: Vec<Instant> = history
            .verifications()
            .iter()
            .rev()
            .filter(|v| v.changed)
            .take(self.k())
            .map(|v| v.timestamp)
            .collect();

        // We asked for K changes but may have fewer; use what is there.
        let Some(oldest) = changes.last() else {
            debug!("No observed value updates yet, using cold start update rate");
            return COLD_START_RATE;
        };
        let span = now.saturating_duration_since(*oldest).as_secs_f64();
        changes.len() as f64 / span
    }
}

/// TTL at which an exponential process with rate `mu` has changed with
/// probability `rho`.
fn ttl_for_risk(mu: f64, rho: f64) -> Duration {
    let t = -(1.0 / mu) * (1.0 - rho).ln();
    if t.is_finite() && t > 0.0 {
        Duration::try_from_secs_f64(t).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

impl EstimationStrategy for UpdateRisk {
    fn name(&self) -> &str {
        "update-risk"
    }

    fn initialize(&mut self) -> Result<(), EstimationError> {
        Self::validate(self.k, self.rho, self.default_interval)?;
        let k = *self.k.get_or_insert(DEFAULT_K);
        info!(
            k,
            rho = self.rho,
            default_interval_secs = self.default_interval.as_secs_f64(),
            "Using update-risk based strategy"
        );
        Ok(())
    }

    // Re-check at half the current TTL, but never more often than the floor.
    fn determine_interval(&self, history: &KeyHistory) -> Result<Duration, EstimationError> {
        let Some(estimation) = history.last_estimation() else {
            debug!("No previous estimations, relying on default interval");
            return Ok(self.default_interval);
        };
        Ok((estimation.validity / 2).max(self.default_interval))
    }

    fn determine_estimation(
        &self,
        history: &KeyHistory,
        _current_interval: Option<Duration>,
        now: Instant,
    ) -> Result<Option<Duration>, EstimationError> {
        let mu = self.update_rate(history, now);
        Ok(Some(ttl_for_risk(mu, self.rho)))
    }
}
