//! Per-key history of verifications, intervals and estimations.
//!
//! Every cache key owns three bounded, time-ordered logs. The store hands out
//! one mutex per key so that appends for one key are serialized without
//! blocking unrelated keys. Keys that stay idle for longer than the retention
//! period are evicted by periodic sweeps, so the number of tracked keys stays
//! bounded as well.

mod fingerprint;

pub use fingerprint::{ChangeDetector, DigestDetector, ExactDetector, Fingerprint};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::EstimationError;
use crate::key::CacheKey;

/// One observation of whether the value behind a key changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// When the observation was made.
    pub timestamp: Instant,
    /// True if the observed value differs from the previous one.
    pub changed: bool,
}

/// Delay before the next re-estimation for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub duration: Duration,
    pub created_at: Instant,
}

impl Interval {
    /// Whether the scheduled re-estimation time has been reached.
    pub fn is_due(&self, now: Instant) -> bool {
        self.created_at.checked_add(self.duration).is_some_and(|deadline| deadline <= now)
    }
}

/// A computed TTL recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimation {
    pub validity: Duration,
    pub computed_at: Instant,
}

impl Estimation {
    /// Whether the validity period of this estimation has run out.
    pub fn has_expired(&self, now: Instant) -> bool {
        self.computed_at.checked_add(self.validity).is_some_and(|expiry| expiry <= now)
    }
}

trait Timestamped {
    fn at(&self) -> Instant;
}

impl Timestamped for Verification {
    fn at(&self) -> Instant {
        self.timestamp
    }
}

impl Timestamped for Interval {
    fn at(&self) -> Instant {
        self.created_at
    }
}

impl Timestamped for Estimation {
    fn at(&self) -> Instant {
        self.computed_at
    }
}

/// Minimum number of writes between two idle-key sweeps.
///
/// After a sweep the next one waits for at least as many writes as there are
/// keys left, which keeps its cost constant per write.
pub const EVICTION_SWEEP_MIN: usize = 1024;

/// Bounds applied to every per-key log after each append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Maximum number of entries kept per log.
    pub max_events: usize,
    /// Entries older than this are dropped from the front of a log, and keys
    /// idle for longer are evicted.
    pub retention: Duration,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self { max_events: 128, retention: Duration::from_secs(3600) }
    }
}

/// Drop entries from the front of `log` until it respects `limits`.
///
/// With `keep_last` the newest entry survives age-based trimming, so the
/// latest interval and estimation stay readable after a long quiet period.
fn trim<T: Timestamped>(log: &mut VecDeque<T>, limits: HistoryLimits, now: Instant, keep_last: bool) {
    let max_events = limits.max_events.max(1);
    while log.len() > max_events {
        log.pop_front();
    }
    let floor = usize::from(keep_last);
    while log.len() > floor {
        match log.front() {
            Some(entry) if now.saturating_duration_since(entry.at()) > limits.retention => {
                log.pop_front();
            }
            _ => break,
        }
    }
}

/// The three logs kept for a single cache key.
#[derive(Debug, Default, Clone)]
pub struct KeyHistory {
    verifications: VecDeque<Verification>,
    intervals: VecDeque<Interval>,
    estimations: VecDeque<Estimation>,
    last_fingerprint: Option<Fingerprint>,
}

impl KeyHistory {
    /// Verifications, oldest first.
    pub fn verifications(&self) -> &VecDeque<Verification> {
        &self.verifications
    }

    /// Scheduled intervals, oldest first.
    pub fn intervals(&self) -> &VecDeque<Interval> {
        &self.intervals
    }

    /// Emitted estimations, oldest first.
    pub fn estimations(&self) -> &VecDeque<Estimation> {
        &self.estimations
    }

    pub fn last_interval(&self) -> Option<Interval> {
        self.intervals.back().copied()
    }

    pub fn last_estimation(&self) -> Option<Estimation> {
        self.estimations.back().copied()
    }

    /// Timestamp of the newest entry in any of the three logs.
    pub fn last_activity(&self) -> Option<Instant> {
        let verification = self.verifications.back().map(|v| v.timestamp);
        let interval = self.intervals.back().map(|i| i.created_at);
        let estimation = self.estimations.back().map(|e| e.computed_at);
        [verification, interval, estimation].into_iter().flatten().max()
    }

    pub fn push_verification(&mut self, verification: Verification, limits: HistoryLimits) {
        self.verifications.push_back(verification);
        trim(&mut self.verifications, limits, verification.timestamp, false);
    }

    pub fn push_interval(&mut self, interval: Interval, limits: HistoryLimits) {
        self.intervals.push_back(interval);
        trim(&mut self.intervals, limits, interval.created_at, true);
    }

    pub fn push_estimation(&mut self, estimation: Estimation, limits: HistoryLimits) {
        self.estimations.push_back(estimation);
        trim(&mut self.estimations, limits, estimation.computed_at, true);
    }

    /// Compare `fingerprint` against the previous value and log the outcome.
    ///
    /// The first observation of a key only establishes the baseline, so it is
    /// recorded as unchanged.
    pub fn observe(&mut self, fingerprint: Fingerprint, at: Instant, limits: HistoryLimits) -> bool {
        let changed = self.last_fingerprint.as_ref().is_some_and(|previous| *previous != fingerprint);
        self.last_fingerprint = Some(fingerprint);
        self.push_verification(Verification { timestamp: at, changed }, limits);
        changed
    }
}

/// Shared store of [`KeyHistory`] values, one lock per key.
#[derive(Debug)]
pub struct HistoryStore {
    keys: RwLock<HashMap<CacheKey, Arc<Mutex<KeyHistory>>>>,
    limits: HistoryLimits,
    writes_since_sweep: AtomicUsize,
    sweep_threshold: AtomicUsize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HistoryLimits::default())
    }
}

impl HistoryStore {
    /// Create an empty store with the given limits.
    #[must_use]
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            limits,
            writes_since_sweep: AtomicUsize::new(0),
            sweep_threshold: AtomicUsize::new(EVICTION_SWEEP_MIN),
        }
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Number of keys with history.
    pub fn len(&self) -> usize {
        self.keys.read().map_or(0, |keys| keys.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the history slot for `key`, creating it on first access.
    fn slot(&self, key: &CacheKey) -> Result<Arc<Mutex<KeyHistory>>, EstimationError> {
        {
            let keys = self.keys.read().map_err(|e| poisoned(key, &e))?;
            if let Some(slot) = keys.get(key) {
                return Ok(Arc::clone(slot));
            }
        }
        let mut keys = self.keys.write().map_err(|e| poisoned(key, &e))?;
        Ok(Arc::clone(keys.entry(key.clone()).or_default()))
    }

    /// Run `f` with exclusive access to the history of `key`.
    ///
    /// All writes to one key go through here, so an interval and the
    /// estimation it belongs to can be committed in a single critical section.
    pub fn with_history<T>(
        &self,
        key: &CacheKey,
        f: impl FnOnce(&mut KeyHistory, HistoryLimits) -> T,
    ) -> Result<T, EstimationError> {
        let slot = self.slot(key)?;
        let mut history = slot.lock().map_err(|e| poisoned(key, &e))?;
        Ok(f(&mut history, self.limits))
    }

    /// [`with_history`](Self::with_history) for writes made at `now`.
    ///
    /// Counts the write and, once enough have accumulated, sweeps idle keys.
    pub fn with_history_at<T>(
        &self,
        key: &CacheKey,
        now: Instant,
        f: impl FnOnce(&mut KeyHistory, HistoryLimits) -> T,
    ) -> Result<T, EstimationError> {
        let result = self.with_history(key, f)?;
        let writes = self.writes_since_sweep.fetch_add(1, Ordering::Relaxed) + 1;
        if writes >= self.sweep_threshold.load(Ordering::Relaxed) {
            self.writes_since_sweep.store(0, Ordering::Relaxed);
            if let Err(e) = self.evict_idle(now) {
                debug!(error = %e, "Skipped idle key sweep");
            }
        }
        Ok(result)
    }

    /// Drop every key with no entry newer than the retention period.
    ///
    /// Keys currently in use by another caller are kept. Returns the number of
    /// evicted keys.
    pub fn evict_idle(&self, now: Instant) -> Result<usize, EstimationError> {
        let retention = self.limits.retention;
        let mut keys = self.keys.write().map_err(|e| {
            error!(error = %e, "Failed to acquire history map lock");
            EstimationError::LockPoisoned("history map".to_string())
        })?;
        let before = keys.len();
        keys.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(history) => history
                    .last_activity()
                    .is_some_and(|at| now.saturating_duration_since(at) <= retention),
                Err(TryLockError::WouldBlock) => true,
                Err(TryLockError::Poisoned(_)) => false,
            }
        });
        let evicted = before - keys.len();
        self.sweep_threshold.store(EVICTION_SWEEP_MIN.max(keys.len()), Ordering::Relaxed);
        if evicted > 0 {
            debug!(evicted, remaining = keys.len(), "Evicted idle cache keys");
        }
        Ok(evicted)
    }

    pub fn append_verification(
        &self,
        key: &CacheKey,
        changed: bool,
        at: Instant,
    ) -> Result<(), EstimationError> {
        self.with_history_at(key, at, |history, limits| {
            history.push_verification(Verification { timestamp: at, changed }, limits);
        })
    }

    pub fn append_estimation(
        &self,
        key: &CacheKey,
        estimation: Estimation,
    ) -> Result<(), EstimationError> {
        self.with_history_at(key, estimation.computed_at, |history, limits| {
            history.push_estimation(estimation, limits);
        })
    }

    pub fn append_interval(&self, key: &CacheKey, interval: Interval) -> Result<(), EstimationError> {
        self.with_history_at(key, interval.created_at, |history, limits| {
            history.push_interval(interval, limits);
        })
    }

    /// The most recent interval and estimation for `key`.
    pub fn latest(
        &self,
        key: &CacheKey,
    ) -> Result<(Option<Interval>, Option<Estimation>), EstimationError> {
        self.with_history(key, |history, _| (history.last_interval(), history.last_estimation()))
    }

    /// Copy of the verification log for `key`, most recent last.
    pub fn verifications(&self, key: &CacheKey) -> Result<Vec<Verification>, EstimationError> {
        self.with_history(key, |history, _| history.verifications.iter().copied().collect())
    }
}

fn poisoned<E: std::fmt::Display>(key: &CacheKey, err: &E) -> EstimationError {
    error!(key = %key, error = %err, "Failed to acquire history lock");
    EstimationError::LockPoisoned(key.to_string())
}
