//! Wait strategies of the ring buffer worker

use crossbeam::utils::Backoff;
use metricstore_common::config::{QueueConfig, WaitStrategyKind};
use parking_lot::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Nap taken by the sleeping strategy once its retries are used up
const SLEEP_NAP: Duration = Duration::from_micros(100);

/// How the worker waits while the ring buffer is empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Park until a producer signals
    Blocking,
    /// Spin on the ring
    BusySpin,
    /// Spin briefly, then yield the thread
    Yielding,
    /// Spin, yield, then sleep once `retries` attempts are used up
    Sleeping { retries: u32 },
    /// Spin for `spin`, yield until `spin + yield_for`, then use `fallback`
    PhasedBackoff {
        spin: Duration,
        yield_for: Duration,
        fallback: Box<WaitStrategy>,
    },
    /// Park until signalled or `timeout` elapsed
    TimeoutBlocking { timeout: Duration },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::Blocking
    }
}

impl WaitStrategy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::from_kind(config.wait_strategy, config)
    }

    fn from_kind(kind: WaitStrategyKind, config: &QueueConfig) -> Self {
        match kind {
            WaitStrategyKind::Blocking => Self::Blocking,
            WaitStrategyKind::BusySpin => Self::BusySpin,
            WaitStrategyKind::Yielding => Self::Yielding,
            WaitStrategyKind::Sleeping => Self::Sleeping {
                retries: config.sleeping_retries,
            },
            WaitStrategyKind::PhasedBackoff => {
                let fallback = match config.fallback {
                    // A nested phased back-off would never reach a parking phase
                    WaitStrategyKind::PhasedBackoff => Self::Blocking,
                    other => Self::from_kind(other, config),
                };
                Self::PhasedBackoff {
                    spin: config.spin_timeout(),
                    yield_for: config.yield_timeout(),
                    fallback: Box::new(fallback),
                }
            }
            WaitStrategyKind::TimeoutBlocking => Self::TimeoutBlocking {
                timeout: config.timeout(),
            },
        }
    }

    /// Whether producers must signal the parked worker
    pub fn needs_signal(&self) -> bool {
        match self {
            Self::Blocking | Self::TimeoutBlocking { .. } => true,
            Self::PhasedBackoff { fallback, .. } => fallback.needs_signal(),
            Self::BusySpin | Self::Yielding | Self::Sleeping { .. } => false,
        }
    }
}

/// Wake-up channel between producers and a parked worker
#[derive(Debug, Default)]
pub struct Signal {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Signal {
    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

/// Idle state of one worker across consecutive empty polls
pub struct Waiter {
    strategy: WaitStrategy,
    backoff: Backoff,
    attempts: u32,
    idle_since: Option<Instant>,
}

impl Waiter {
    pub fn new(strategy: WaitStrategy) -> Self {
        Self {
            strategy,
            backoff: Backoff::new(),
            attempts: 0,
            idle_since: None,
        }
    }

    /// Work arrived; the next idle period starts from scratch
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.attempts = 0;
        self.idle_since = None;
    }

    /// Wait once; `ready` is re-checked under the signal lock before parking
    pub fn wait(&mut self, signal: &Signal, ready: impl Fn() -> bool) {
        let idle_since = *self.idle_since.get_or_insert_with(Instant::now);
        self.attempts = self.attempts.saturating_add(1);
        let strategy = self.strategy.clone();
        self.wait_with(&strategy, idle_since, signal, &ready);
    }

    fn wait_with(
        &self,
        strategy: &WaitStrategy,
        idle_since: Instant,
        signal: &Signal,
        ready: &dyn Fn() -> bool,
    ) {
        match strategy {
            WaitStrategy::BusySpin => std::hint::spin_loop(),
            WaitStrategy::Yielding => self.backoff.snooze(),
            WaitStrategy::Sleeping { retries } => {
                if self.attempts <= retries / 2 {
                    std::hint::spin_loop();
                } else if self.attempts <= *retries {
                    thread::yield_now();
                } else {
                    thread::sleep(SLEEP_NAP);
                }
            }
            WaitStrategy::PhasedBackoff {
                spin,
                yield_for,
                fallback,
            } => {
                let idle = idle_since.elapsed();
                if idle < *spin {
                    std::hint::spin_loop();
                } else if idle < *spin + *yield_for {
                    thread::yield_now();
                } else {
                    self.wait_with(fallback, idle_since, signal, ready);
                }
            }
            WaitStrategy::Blocking => {
                let mut guard = signal.lock.lock();
                if !ready() {
                    signal.condvar.wait(&mut guard);
                }
            }
            WaitStrategy::TimeoutBlocking { timeout } => {
                let mut guard = signal.lock.lock();
                if !ready() {
                    signal.condvar.wait_for(&mut guard, *timeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = QueueConfig::default();
        assert_eq!(WaitStrategy::from_config(&config), WaitStrategy::Blocking);

        config.wait_strategy = WaitStrategyKind::Sleeping;
        assert_eq!(
            WaitStrategy::from_config(&config),
            WaitStrategy::Sleeping { retries: 200 }
        );

        config.wait_strategy = WaitStrategyKind::PhasedBackoff;
        config.fallback = WaitStrategyKind::Sleeping;
        let strategy = WaitStrategy::from_config(&config);
        assert_eq!(
            strategy,
            WaitStrategy::PhasedBackoff {
                spin: Duration::from_millis(1),
                yield_for: Duration::from_millis(10),
                fallback: Box::new(WaitStrategy::Sleeping { retries: 200 }),
            }
        );
        assert!(!strategy.needs_signal());
    }

    #[test]
    fn test_blocking_does_not_park_when_ready() {
        let signal = Signal::default();
        let mut waiter = Waiter::new(WaitStrategy::Blocking);
        // Returns immediately because the condition already holds
        waiter.wait(&signal, || true);
    }

    #[test]
    fn test_timeout_blocking_returns() {
        let signal = Signal::default();
        let mut waiter = Waiter::new(WaitStrategy::TimeoutBlocking {
            timeout: Duration::from_millis(5),
        });
        let start = Instant::now();
        waiter.wait(&signal, || false);
        assert!(start.elapsed() >= Duration::from_millis(1));
    }
}
