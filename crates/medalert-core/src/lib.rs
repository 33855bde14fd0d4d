// Core client logic: session, background polling, push handling
pub mod config;
pub mod connectivity;
pub mod credentials;
pub mod error;
pub mod poller;
pub mod presenter;
pub mod providers;
pub mod push;
pub mod scheduler;
pub mod session;

pub use config::Config;
pub use connectivity::{ConnectivityProbe, TcpProbe};
pub use credentials::CredentialStore;
pub use error::Error;
pub use poller::{NotificationPoller, PollJob, PollReport, PollResult};
pub use presenter::{ConsolePresenter, NotificationPresenter, PresentationError};
pub use push::{PushHandler, PushMessage};
pub use scheduler::{JobOutcome, RecurringJob, Scheduler, SchedulerPolicy, TokioScheduler};
pub use session::{Dashboard, Session, SessionContext};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
