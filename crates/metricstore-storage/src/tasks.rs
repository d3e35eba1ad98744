//! Periodic maintenance of the filesystem repository
//!
//! [`CompressTask`] compacts every bucket's days older than
//! `max_uncompressed_days`, [`DeleteTask`] removes days older than
//! `days_to_keep`. A [`TaskScheduler`] thread fires them at fixed intervals.

use crate::command::CommandHandle;
use crate::repository::{FilesystemMetricRepository, MetricRepository};
use chrono::{DateTime, Days, NaiveDate, Utc};
use metricstore_common::config::TasksConfig;
use metricstore_common::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Work fired by the [`TaskScheduler`]
pub trait MaintenanceTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run once; returns the number of affected days
    fn run(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct TaskStats {
    pub runs: AtomicU64,
    pub failures: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl TaskStats {
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock()
    }
}

type Action = fn(&FilesystemMetricRepository, &str, NaiveDate) -> Result<CommandHandle<usize>>;

/// Applies one day-threshold action to every bucket
struct DayTask {
    name: &'static str,
    repository: Arc<FilesystemMetricRepository>,
    days: u32,
    action: Action,
    stats: TaskStats,
}

impl DayTask {
    fn until(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(u64::from(self.days)))
            .unwrap_or(NaiveDate::MIN)
    }

    fn run_at(&self, today: NaiveDate) -> Result<usize> {
        *self.stats.last_run.lock() = Some(Utc::now());
        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        let until = self.until(today);
        debug!("Running {} task until {}", self.name, until);

        let result = self.run_buckets(until);
        if result.is_err() {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn run_buckets(&self, until: NaiveDate) -> Result<usize> {
        let mut handles = Vec::new();
        for bucket in self.repository.list_buckets()? {
            handles.push((bucket.name.clone(), (self.action)(&self.repository, &bucket.name, until)?));
        }
        let mut affected = 0;
        let mut first_error = None;
        for (bucket, handle) in handles {
            match handle.wait() {
                Ok(days) => affected += days,
                Err(e) => {
                    error!("{} task failed for bucket {}: {}", self.name, bucket, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("{} task finished: {} days until {}", self.name, affected, until);
                Ok(affected)
            }
        }
    }
}

/// Compacts days older than the configured number of uncompressed days
pub struct CompressTask(DayTask);

impl CompressTask {
    pub fn new(repository: Arc<FilesystemMetricRepository>, max_uncompressed_days: u32) -> Self {
        Self(DayTask {
            name: "compress",
            repository,
            days: max_uncompressed_days,
            action: FilesystemMetricRepository::compress,
            stats: TaskStats::default(),
        })
    }

    /// First day left uncompressed when run on `today`
    pub fn until(&self, today: NaiveDate) -> NaiveDate {
        self.0.until(today)
    }

    pub fn run_at(&self, today: NaiveDate) -> Result<usize> {
        self.0.run_at(today)
    }

    pub const fn stats(&self) -> &TaskStats {
        &self.0.stats
    }
}

impl MaintenanceTask for CompressTask {
    fn name(&self) -> &'static str {
        self.0.name
    }

    fn run(&self) -> Result<usize> {
        self.0.run_at(Utc::now().date_naive())
    }
}

/// Deletes days older than the retention period
pub struct DeleteTask(DayTask);

impl DeleteTask {
    pub fn new(repository: Arc<FilesystemMetricRepository>, days_to_keep: u32) -> Self {
        Self(DayTask {
            name: "delete",
            repository,
            days: days_to_keep,
            action: FilesystemMetricRepository::delete,
            stats: TaskStats::default(),
        })
    }

    /// First day kept when run on `today`
    pub fn until(&self, today: NaiveDate) -> NaiveDate {
        self.0.until(today)
    }

    pub fn run_at(&self, today: NaiveDate) -> Result<usize> {
        self.0.run_at(today)
    }

    pub const fn stats(&self) -> &TaskStats {
        &self.0.stats
    }
}

impl MaintenanceTask for DeleteTask {
    fn name(&self) -> &'static str {
        self.0.name
    }

    fn run(&self) -> Result<usize> {
        self.0.run_at(Utc::now().date_naive())
    }
}

struct Scheduled {
    task: Arc<dyn MaintenanceTask>,
    interval: Duration,
    next: Instant,
}

/// Background thread firing maintenance tasks at fixed intervals
///
/// Each task first runs one interval after start.
pub struct TaskScheduler {
    stopped: Arc<(Mutex<bool>, Condvar)>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn start(tasks: Vec<(Arc<dyn MaintenanceTask>, Duration)>) -> Result<Self> {
        let stopped = Arc::new((Mutex::new(false), Condvar::new()));
        let now = Instant::now();
        let mut scheduled: Vec<Scheduled> = tasks
            .into_iter()
            .map(|(task, interval)| {
                let interval = interval.max(Duration::from_secs(1));
                Scheduled {
                    task,
                    interval,
                    next: now + interval,
                }
            })
            .collect();

        let thread_stopped = Arc::clone(&stopped);
        let handle = thread::Builder::new()
            .name("metricstore-tasks".to_string())
            .spawn(move || {
                info!("Task scheduler started with {} tasks", scheduled.len());
                let (lock, condvar) = &*thread_stopped;
                loop {
                    let Some(deadline) = scheduled.iter().map(|s| s.next).min() else {
                        break;
                    };
                    {
                        let mut stopped = lock.lock();
                        while !*stopped && Instant::now() < deadline {
                            condvar.wait_until(&mut stopped, deadline);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    let now = Instant::now();
                    for entry in scheduled.iter_mut().filter(|s| s.next <= now) {
                        if let Err(e) = entry.task.run() {
                            error!("Task {} failed: {}", entry.task.name(), e);
                        }
                        entry.next = Instant::now() + entry.interval;
                    }
                }
                info!("Task scheduler stopped");
            })?;

        Ok(Self {
            stopped,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Scheduler for the compress and delete tasks of `repository`
    pub fn for_repository(
        repository: &Arc<FilesystemMetricRepository>,
        config: &TasksConfig,
    ) -> Result<Self> {
        let compress: Arc<dyn MaintenanceTask> = Arc::new(CompressTask::new(
            Arc::clone(repository),
            config.max_uncompressed_days,
        ));
        let delete: Arc<dyn MaintenanceTask> =
            Arc::new(DeleteTask::new(Arc::clone(repository), config.days_to_keep));
        Self::start(vec![
            (compress, config.compress_interval()),
            (delete, config.delete_interval()),
        ])
    }

    /// Interrupt the wait and join the scheduler thread
    pub fn shutdown(&self) {
        {
            let (lock, condvar) = &*self.stopped;
            *lock.lock() = true;
            condvar.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Task scheduler thread panicked");
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
