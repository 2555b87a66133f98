//! Validity estimator: turns completed calls into TTL recommendations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::EstimationConfig;
use crate::error::EstimationError;
use crate::history::{
    ChangeDetector, DigestDetector, Estimation, HistoryLimits, HistoryStore, Interval, KeyHistory,
    Verification,
};
use crate::key::CacheKey;
use crate::strategy::{EstimationStrategy, Strategy};

/// Records verifications per key and asks the configured strategy for a TTL
/// whenever the previous one is due for renewal.
#[derive(Debug)]
pub struct ValidityEstimator {
    strategy: Strategy,
    store: HistoryStore,
    detector: Arc<dyn ChangeDetector>,
}

impl ValidityEstimator {
    /// Build an estimator from configuration, comparing payloads by SHA-256.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the selected strategy cannot be armed.
    pub fn new(config: &EstimationConfig) -> Result<Self, EstimationError> {
        let strategy = Strategy::from_config(config)?;
        Ok(Self::with_strategy(strategy, config.history))
    }

    /// Build an estimator around an already initialized strategy.
    pub fn with_strategy(strategy: Strategy, limits: HistoryLimits) -> Self {
        Self { strategy, store: HistoryStore::new(limits), detector: Arc::new(DigestDetector) }
    }

    /// Replace the payload comparator.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn history(&self) -> &HistoryStore {
        &self.store
    }

    /// Record a completed call for `key` and return the TTL to advertise.
    ///
    /// `Ok(None)` means the strategy has no opinion; `Ok(Some(Duration::ZERO))`
    /// means the value is too volatile to cache. Neither should produce a header.
    ///
    /// # Errors
    ///
    /// Propagates strategy errors such as an unimplemented estimation mode.
    pub fn estimate_max_age(
        &self,
        key: &CacheKey,
        request: &[u8],
        response: &[u8],
    ) -> Result<Option<Duration>, EstimationError> {
        self.estimate_max_age_at(key, request, response, Instant::now())
    }

    /// [`estimate_max_age`](Self::estimate_max_age) with an explicit clock reading.
    pub fn estimate_max_age_at(
        &self,
        key: &CacheKey,
        request: &[u8],
        response: &[u8],
        now: Instant,
    ) -> Result<Option<Duration>, EstimationError> {
        let fingerprint = self.detector.fingerprint(response);
        self.store.with_history_at(key, now, |history, limits| {
            let changed = history.observe(fingerprint, now, limits);
            debug!(
                key = %key,
                request_bytes = request.len(),
                response_bytes = response.len(),
                changed,
                "Recorded verification"
            );
            self.refresh(key, history, limits, now)
        })?
    }

    /// Record an externally decided verification for `key` and return the TTL.
    ///
    /// Used when the caller already knows whether the value changed.
    pub fn observe_at(
        &self,
        key: &CacheKey,
        changed: bool,
        now: Instant,
    ) -> Result<Option<Duration>, EstimationError> {
        self.store.with_history_at(key, now, |history, limits| {
            history.push_verification(Verification { timestamp: now, changed }, limits);
            self.refresh(key, history, limits, now)
        })?
    }

    /// Re-estimate if due, otherwise return the standing estimation.
    ///
    /// Runs inside the key's critical section, so the estimation and the
    /// interval scheduled after it are committed together.
    fn refresh(
        &self,
        key: &CacheKey,
        history: &mut KeyHistory,
        limits: HistoryLimits,
        now: Instant,
    ) -> Result<Option<Duration>, EstimationError> {
        let last_interval = history.last_interval();
        let last_estimation = history.last_estimation();

        let due = last_interval.is_none_or(|interval| interval.is_due(now))
            || last_estimation.is_some_and(|estimation| estimation.has_expired(now));
        if !due {
            return Ok(last_estimation.map(|estimation| estimation.validity));
        }

        let validity = self.strategy.determine_estimation(
            history,
            last_interval.map(|interval| interval.duration),
            now,
        )?;
        if let Some(validity) = validity {
            history.push_estimation(Estimation { validity, computed_at: now }, limits);
        }
        let duration = self.strategy.determine_interval(history)?;
        history.push_interval(Interval { duration, created_at: now }, limits);

        debug!(
            key = %key,
            strategy = self.strategy.name(),
            validity_secs = validity.map(|v| v.as_secs_f64()),
            next_estimation_secs = duration.as_secs_f64(),
            "Computed new estimation"
        );
        Ok(validity)
    }
}
