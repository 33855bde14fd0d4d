// Recurring background jobs on top of tokio tasks
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::connectivity::ConnectivityProbe;

/// How a single run of a job went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Try again after the backoff delay
    Retry,
    /// This run is a lost cause; wait for the next regular period
    Failure,
}

#[async_trait]
pub trait RecurringJob: Send + Sync {
    async fn run(&self) -> JobOutcome;
}

/// Something that can run jobs periodically
///
/// Jobs are unique by name: scheduling a name that is already running
/// replaces the old job instead of adding a second one.
pub trait Scheduler {
    fn schedule_recurring(&self, name: &str, interval_minimum: Duration, job: Arc<dyn RecurringJob>);

    /// Returns false if no job with that name was scheduled
    fn cancel(&self, name: &str) -> bool;
}

/// Timing knobs for [`TokioScheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    /// Linear backoff step: the n-th consecutive retry waits `n * backoff_base`
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Shortest period a job may run at; smaller intervals are raised to this
    pub min_interval: Duration,
    /// How often to look again while the network is down
    pub offline_recheck: Duration,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(5 * 60 * 60),
            min_interval: Duration::from_secs(60),
            offline_recheck: Duration::from_secs(30),
        }
    }
}

impl SchedulerPolicy {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(attempt.max(1))
            .min(self.backoff_max)
    }
}

/// Runs each job on its own tokio task
///
/// Must be used from inside a tokio runtime. Dropping the scheduler aborts
/// every job it started.
pub struct TokioScheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    policy: SchedulerPolicy,
    probe: Option<Arc<dyn ConnectivityProbe>>,
}

impl TokioScheduler {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            policy,
            probe: None,
        }
    }

    /// Only run jobs while `probe` reports the network as reachable
    pub fn with_connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for (name, handle) in jobs.drain() {
            debug!("Stopping job {}", name);
            handle.abort();
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(SchedulerPolicy::default())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_recurring(&self, name: &str, interval_minimum: Duration, job: Arc<dyn RecurringJob>) {
        let interval = interval_minimum.max(self.policy.min_interval);
        if interval != interval_minimum {
            warn!(
                "{}: interval {:?} is below the minimum, using {:?}",
                name, interval_minimum, interval
            );
        }

        let handle = tokio::spawn(run_recurring(
            name.to_string(),
            interval,
            job,
            self.policy.clone(),
            self.probe.clone(),
        ));

        let previous = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), handle);

        if let Some(previous) = previous {
            info!("Replacing scheduled job {}", name);
            previous.abort();
        } else {
            info!("Scheduled job {} every {:?}", name, interval);
        }
    }

    fn cancel(&self, name: &str) -> bool {
        let handle = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);

        match handle {
            Some(handle) => {
                handle.abort();
                info!("Cancelled job {}", name);
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_recurring(
    name: String,
    interval: Duration,
    job: Arc<dyn RecurringJob>,
    policy: SchedulerPolicy,
    probe: Option<Arc<dyn ConnectivityProbe>>,
) {
    let mut attempt: u32 = 0;

    loop {
        if let Some(probe) = &probe {
            if !probe.is_online().await {
                debug!("{}: offline, checking again in {:?}", name, policy.offline_recheck);
                sleep(policy.offline_recheck).await;
                continue;
            }
        }

        let delay = match job.run().await {
            JobOutcome::Success => {
                attempt = 0;
                interval
            }
            JobOutcome::Retry => {
                attempt = attempt.saturating_add(1);
                let delay = policy.backoff_delay(attempt);
                info!("{}: retry {} in {:?}", name, attempt, delay);
                delay
            }
            JobOutcome::Failure => {
                attempt = 0;
                error!("{}: run failed permanently, waiting for the next period", name);
                interval
            }
        };

        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

    /// Plays back scripted outcomes, then succeeds forever
    struct ScriptedJob {
        runs: AtomicU32,
        script: Mutex<VecDeque<JobOutcome>>,
    }

    impl ScriptedJob {
        fn new(script: Vec<JobOutcome>) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicU32::new(0),
                script: Mutex::new(script.into()),
            })
        }

        fn runs(&self) -> u32 {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecurringJob for ScriptedJob {
        async fn run(&self) -> JobOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(JobOutcome::Success)
        }
    }

    struct FlakyNetwork {
        offline_checks_left: AtomicU32,
    }

    #[async_trait]
    impl ConnectivityProbe for FlakyNetwork {
        async fn is_online(&self) -> bool {
            let left = self.offline_checks_left.load(Ordering::SeqCst);
            if left == 0 {
                return true;
            }
            self.offline_checks_left.store(left - 1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = SchedulerPolicy {
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(25),
            min_interval: Duration::from_secs(60),
            offline_recheck: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_interval() {
        let scheduler = TokioScheduler::default();
        let job = ScriptedJob::new(vec![]);

        scheduler.schedule_recurring("poll", FIFTEEN_MINUTES, job.clone());
        assert!(scheduler.is_scheduled("poll"));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(job.runs(), 1);

        sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(job.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_linear_backoff() {
        let scheduler = TokioScheduler::default();
        let job = ScriptedJob::new(vec![JobOutcome::Retry, JobOutcome::Retry]);

        scheduler.schedule_recurring("poll", FIFTEEN_MINUTES, job.clone());

        // runs at 0s, 10s, 30s, then back to the regular period
        sleep(Duration::from_secs(5)).await;
        assert_eq!(job.runs(), 1);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(job.runs(), 2);
        sleep(Duration::from_secs(20)).await;
        assert_eq!(job.runs(), 3);
        sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(job.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_waits_for_next_period() {
        let scheduler = TokioScheduler::default();
        let job = ScriptedJob::new(vec![JobOutcome::Failure]);

        scheduler.schedule_recurring("poll", FIFTEEN_MINUTES, job.clone());

        sleep(Duration::from_secs(14 * 60)).await;
        assert_eq!(job.runs(), 1);
        sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(job.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let scheduler = TokioScheduler::default();
        let job = ScriptedJob::new(vec![]);

        scheduler.schedule_recurring("poll", Duration::ZERO, job.clone());

        // runs at 0s, 60s and 120s only
        sleep(Duration::from_secs(150)).await;
        assert_eq!(job.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_job() {
        let scheduler = TokioScheduler::default();
        let first = ScriptedJob::new(vec![]);
        let second = ScriptedJob::new(vec![]);

        scheduler.schedule_recurring("poll", FIFTEEN_MINUTES, first.clone());
        sleep(Duration::from_secs(1)).await;
        scheduler.schedule_recurring("poll", FIFTEEN_MINUTES, second.clone());

        sleep(Duration::from_secs(31 * 60)).await;
        assert_eq!(first.runs(), 1);
        assert_eq!(second.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_job() {
        let scheduler = TokioScheduler::default();
        let job = ScriptedJob::new(vec![]);

        scheduler.schedule_recurring("poll", FIFTEEN_MINUTES, job.clone());
        sleep(Duration::from_secs(1)).await;

        assert!(scheduler.cancel("poll"));
        assert!(!scheduler.cancel("poll"));
        assert!(!scheduler.is_scheduled("poll"));

        sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_connectivity() {
        let probe = Arc::new(FlakyNetwork {
            offline_checks_left: AtomicU32::new(2),
        });
        let scheduler = TokioScheduler::default().with_connectivity(probe);
        let job = ScriptedJob::new(vec![]);

        scheduler.schedule_recurring("poll", FIFTEEN_MINUTES, job.clone());

        // two offline checks, 30s apart, before the first run at 60s
        sleep(Duration::from_secs(59)).await;
        assert_eq!(job.runs(), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(job.runs(), 1);
    }
}
