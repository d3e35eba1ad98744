//! Rolling time window mirrored by the cache

use chrono::{DateTime, TimeDelta, Utc};
use metricstore_common::{Interval, StoredMetric};
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// `[now - period, now]` for an injectable clock
#[derive(Clone)]
pub struct CacheWindow {
    period: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl CacheWindow {
    pub fn new(period: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            period: TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX),
            clock,
        }
    }

    pub fn system(period: Duration) -> Self {
        Self::new(period, Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub const fn period(&self) -> TimeDelta {
        self.period
    }

    pub fn current(&self) -> Interval {
        let now = self.now();
        let start = now.checked_sub_signed(self.period).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Interval::new(start, now).unwrap_or_else(|_| Interval::empty_at(now))
    }

    /// Whether `metric` is not older than the window start
    pub fn is_cacheable(&self, metric: &StoredMetric) -> bool {
        metric.timestamp >= self.current().start()
    }
}

impl std::fmt::Debug for CacheWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWindow")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}
