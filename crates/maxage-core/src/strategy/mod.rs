//! Estimation strategies.
//!
//! A strategy turns the history of a cache key into two numbers: how long the
//! current response may be cached, and how long to wait before asking again.
//! The set of strategies is closed; [`Strategy`] is selected once from
//! configuration and held by the estimator for its whole lifetime.

mod passthrough;
mod static_ttl;
mod update_risk;

pub use passthrough::Passthrough;
pub use static_ttl::StaticTtl;
pub use update_risk::{DEFAULT_K, UpdateRisk};

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{EstimationConfig, MaxAgeMode};
use crate::error::EstimationError;
use crate::history::KeyHistory;

/// Capabilities shared by every estimation strategy.
pub trait EstimationStrategy: Send + Sync + fmt::Debug {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// One-time setup: parameter defaulting and validation. Idempotent.
    fn initialize(&mut self) -> Result<(), EstimationError>;

    /// Delay before the next re-estimation for a key with this history.
    fn determine_interval(&self, history: &KeyHistory) -> Result<Duration, EstimationError>;

    /// A fresh TTL for a key with this history.
    ///
    /// `Ok(None)` means the strategy has no opinion and no header should be sent.
    fn determine_estimation(
        &self,
        history: &KeyHistory,
        current_interval: Option<Duration>,
        now: Instant,
    ) -> Result<Option<Duration>, EstimationError>;
}

/// A mode that configuration accepts but that has no algorithm yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unimplemented {
    mode: String,
    default_interval: Duration,
}

impl Unimplemented {
    pub fn new(mode: impl Into<String>, default_interval: Duration) -> Self {
        Self { mode: mode.into(), default_interval }
    }
}

impl EstimationStrategy for Unimplemented {
    fn name(&self) -> &str {
        &self.mode
    }

    fn initialize(&mut self) -> Result<(), EstimationError> {
        tracing::warn!(mode = %self.mode, "Estimation mode has no algorithm, responses carry no cache-control");
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
        Err(EstimationError::UnimplementedStrategy(self.mode.clone()))
    }
}

/// The configured strategy.
#[derive(Debug, Clone)]
pub enum Strategy {
    Passthrough(Passthrough),
    Static(StaticTtl),
    UpdateRisk(UpdateRisk),
    Unimplemented(Unimplemented),
}

impl Strategy {
    /// Build and initialize the strategy selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the strategy parameters are invalid;
    /// such a strategy is never armed.
    pub fn from_config(config: &EstimationConfig) -> Result<Self, EstimationError> {
        let mut strategy = match &config.mode {
            MaxAgeMode::Passthrough => Self::Passthrough(Passthrough::new(config.default_interval)),
            MaxAgeMode::Static(ttl) => Self::Static(StaticTtl::new(*ttl, config.default_interval)),
            MaxAgeMode::UpdateRisk => Self::UpdateRisk(UpdateRisk::new(
                config.update_risk.k,
                config.update_risk.rho,
                config.default_interval,
            )),
            MaxAgeMode::Unimplemented(mode) => {
                Self::Unimplemented(Unimplemented::new(mode.clone(), config.default_interval))
            }
        };
        strategy.initialize()?;
        Ok(strategy)
    }

    fn inner(&self) -> &dyn EstimationStrategy {
        match self {
            Self::Passthrough(s) => s,
            Self::Static(s) => s,
            Self::UpdateRisk(s) => s,
            Self::Unimplemented(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn EstimationStrategy {
        match self {
            Self::Passthrough(s) => s,
            Self::Static(s) => s,
            Self::UpdateRisk(s) => s,
            Self::Unimplemented(s) => s,
        }
    }
}

impl EstimationStrategy for Strategy {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn initialize(&mut self) -> Result<(), EstimationError> {
        self.inner_mut().initialize()
    }

    fn determine_interval(&self, history: &KeyHistory) -> Result<Duration, EstimationError> {
        self.inner().determine_interval(history)
    }

    fn determine_estimation(
        &self,
        history: &KeyHistory,
        current_interval: Option<Duration>,
        now: Instant,
    ) -> Result<Option<Duration>, EstimationError> {
        self.inner().determine_estimation(history, current_interval, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdateRiskParams;

    fn config(mode: MaxAgeMode) -> EstimationConfig {
        EstimationConfig { mode, ..EstimationConfig::default() }
    }

    #[test]
    fn test_from_config_selects_variant() {
        assert!(matches!(
            Strategy::from_config(&config(MaxAgeMode::Passthrough)).unwrap(),
            Strategy::Passthrough(_)
        ));
        assert!(matches!(
            Strategy::from_config(&config(MaxAgeMode::Static(Duration::from_secs(30)))).unwrap(),
            Strategy::Static(_)
        ));
        assert!(matches!(
            Strategy::from_config(&config(MaxAgeMode::UpdateRisk)).unwrap(),
            Strategy::UpdateRisk(_)
        ));
    }

    #[test]
    fn test_from_config_rejects_bad_rho() {
        let mut cfg = config(MaxAgeMode::UpdateRisk);
        cfg.update_risk = UpdateRiskParams { k: Some(2), rho: 1.0 };
        assert!(matches!(Strategy::from_config(&cfg), Err(EstimationError::Configuration(_))));
    }

    #[test]
    fn test_unimplemented_mode_surfaces_error() {
        let strategy =
            Strategy::from_config(&config(MaxAgeMode::Unimplemented("dynamic-adaptive".into())))
                .unwrap();
        assert_eq!(strategy.name(), "dynamic-adaptive");
        let err = strategy
            .determine_estimation(&KeyHistory::default(), None, Instant::now())
            .unwrap_err();
        assert_eq!(err, EstimationError::UnimplementedStrategy("dynamic-adaptive".into()));
    }
}
