// Background notification poller: fetch, dedup against what we already showed, present the rest
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medalert_api::Notification;
use medalert_store::SeenSet;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::presenter::NotificationPresenter;
use crate::scheduler::{JobOutcome, RecurringJob, Scheduler};
use crate::Result;

/// Title on every notification raised by the poller
pub const DEFAULT_TITLE: &str = "Medication Alert";

/// Name of the unique periodic job; rescheduling it replaces the old one
pub const POLL_JOB_NAME: &str = "NotificationCheck";

/// Where the latest notifications for a user come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn latest_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>>;
}

/// Persistence for the set of already-presented notification ids
#[cfg_attr(test, mockall::automock)]
pub trait SeenRepository: Send + Sync {
    fn load(&self) -> Result<SeenSet>;
    fn save(&self, set: &SeenSet) -> Result<()>;
}

/// What happened during one cycle that got as far as the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Notifications not seen before; all of them are now marked seen
    pub new_notifications: usize,
    /// New notifications the presenter refused
    pub presentation_failures: usize,
    /// Notifications skipped because they were already presented
    pub already_seen: usize,
}

impl PollReport {
    /// New notifications that actually made it on screen
    pub fn presented(&self) -> usize {
        self.new_notifications - self.presentation_failures
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Success(PollReport),
    /// Something transient failed; the scheduler should back off and try again
    RetryLater(String),
    /// The job input is unusable, retrying won't help
    PermanentFailure(String),
}

impl PollResult {
    pub fn outcome(&self) -> JobOutcome {
        match self {
            PollResult::Success(_) => JobOutcome::Success,
            PollResult::RetryLater(_) => JobOutcome::Retry,
            PollResult::PermanentFailure(_) => JobOutcome::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PollResult::Success(_))
    }
}

/// Runs poll cycles for a user
///
/// Only one cycle touches the seen set at a time, and the set is written once
/// per cycle after every presentation has been attempted. A cycle cancelled
/// halfway therefore leaves the stored set exactly as it was.
pub struct NotificationPoller {
    source: Arc<dyn NotificationSource>,
    presenter: Arc<dyn NotificationPresenter>,
    seen: Arc<dyn SeenRepository>,
    title: String,
    cycle_lock: Mutex<()>,
}

impl NotificationPoller {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        presenter: Arc<dyn NotificationPresenter>,
        seen: Arc<dyn SeenRepository>,
    ) -> Self {
        Self {
            source,
            presenter,
            seen,
            title: DEFAULT_TITLE.to_string(),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Execute one poll cycle
    ///
    /// `user_id` is the raw job input. Presentation errors never fail the
    /// cycle: the id is still marked seen so a denied permission can't turn
    /// into the same alert every fifteen minutes forever.
    pub async fn poll(&self, user_id: Option<&str>) -> PollResult {
        let user_id = match parse_user_id(user_id) {
            Ok(id) => id,
            Err(reason) => {
                error!("Notification poll aborted: {}", reason);
                return PollResult::PermanentFailure(reason);
            }
        };

        let notifications = match self.source.latest_notifications(user_id).await {
            Ok(notifications) => notifications,
            Err(e) => {
                warn!("Fetching notifications for {} failed: {}", user_id, e);
                return PollResult::RetryLater(e.to_string());
            }
        };
        debug!("Fetched {} notifications for {}", notifications.len(), user_id);

        let _cycle = self.cycle_lock.lock().await;

        let mut seen = match self.seen.load() {
            Ok(seen) => seen,
            Err(e) => {
                warn!("Loading seen notifications failed: {}", e);
                return PollResult::RetryLater(e.to_string());
            }
        };

        let mut report = PollReport::default();
        for notification in &notifications {
            let key = notification.id.to_string();
            if seen.contains(&key) {
                report.already_seen += 1;
                continue;
            }

            let notification_id = presentation_id(&notification.id);
            if let Err(e) = self
                .presenter
                .present(notification_id, &self.title, &notification.message)
                .await
            {
                // TODO: split PermissionDenied from transient platform errors if denied alerts should be re-shown later
                warn!("Could not present notification {}: {}", notification.id, e);
                report.presentation_failures += 1;
            }

            seen.insert(key);
            report.new_notifications += 1;
        }

        if report.new_notifications > 0 {
            if let Err(e) = self.seen.save(&seen) {
                warn!("Saving seen notifications failed: {}", e);
                return PollResult::RetryLater(e.to_string());
            }
        }

        info!(
            "Poll cycle done: {} new, {} already seen, {} failed to present",
            report.new_notifications, report.already_seen, report.presentation_failures
        );
        PollResult::Success(report)
    }
}

fn parse_user_id(raw: Option<&str>) -> std::result::Result<Uuid, String> {
    let raw = raw.ok_or_else(|| "missing user id".to_string())?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty user id".to_string());
    }
    Uuid::parse_str(trimmed).map_err(|e| format!("malformed user id {:?}: {}", raw, e))
}

/// Stable 32-bit presentation id for a notification
///
/// XORs the two 64-bit halves of the UUID, then the two 32-bit halves of
/// that. The same notification always maps to the same slot.
pub fn presentation_id(id: &Uuid) -> i32 {
    let (most, least) = id.as_u64_pair();
    let hilo = most ^ least;
    ((hilo >> 32) as u32 ^ hilo as u32) as i32
}

/// Scheduler job wrapping a poller and its stored `USER_ID` input
pub struct PollJob {
    poller: Arc<NotificationPoller>,
    user_id: Option<String>,
}

impl PollJob {
    pub fn new(poller: Arc<NotificationPoller>, user_id: Option<String>) -> Self {
        Self { poller, user_id }
    }
}

#[async_trait]
impl RecurringJob for PollJob {
    async fn run(&self) -> JobOutcome {
        self.poller.poll(self.user_id.as_deref()).await.outcome()
    }
}

/// Register the poller as the unique periodic notification job
pub fn start_periodic_polling<S: Scheduler + ?Sized>(
    scheduler: &S,
    poller: Arc<NotificationPoller>,
    user_id: Uuid,
    interval: Duration,
) {
    let job = PollJob::new(poller, Some(user_id.to_string()));
    scheduler.schedule_recurring(POLL_JOB_NAME, interval, Arc::new(job));
}
