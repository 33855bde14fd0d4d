use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use medalert_api::{BackendClient, RegisterRequest, ScheduleUpdate, UserUpdate};
use medalert_core::poller::{start_periodic_polling, POLL_JOB_NAME};
use medalert_core::push::PushNotification;
use medalert_core::{
    Config, ConsolePresenter, CredentialStore, NotificationPoller, PollResult, PushHandler,
    PushMessage, Scheduler, SchedulerPolicy, Session, SessionContext, TcpProbe, TokioScheduler,
};
use medalert_store::{KvStore, SeenStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// sysexits EX_TEMPFAIL, so wrappers can tell "try again" from "broken"
const EXIT_RETRY_LATER: u8 = 75;

#[derive(Parser)]
#[command(name = "medalert")]
#[command(version, about = "Medication reminders and dispenser alerts from the terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/medalert/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, global = true, env = "MEDALERT_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in and remember the session
    Login {
        email: String,
        #[arg(long, env = "MEDALERT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        name: String,
        email: String,
        #[arg(long, env = "MEDALERT_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "patient")]
        role: String,
    },
    /// Forget the stored session and which notifications were shown
    Logout,
    /// Write the current settings, defaults included, to the config file
    Init,
    /// Show who the stored session belongs to
    Whoami,
    /// Change name or email
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Profile, adherence, devices, schedules and logs in one view
    Dashboard,
    /// List paired dispensers
    Devices,
    /// Recent medication log entries
    Medlogs {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Manage dose schedules
    #[command(subcommand)]
    Schedules(ScheduleCommand),
    /// Register a push token for the current user
    RegisterToken { token: String },
    /// Show a push message as if the messaging service had delivered it
    Push {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        message: String,
    },
    /// Run one notification poll cycle
    Poll {
        #[arg(long, env = "MEDALERT_USER_ID")]
        user_id: Option<String>,
    },
    /// Poll in the background until Ctrl-C
    Watch {
        #[arg(long, env = "MEDALERT_USER_ID")]
        user_id: Option<String>,
    },
}

#[derive(clap::Subcommand)]
enum ScheduleCommand {
    List,
    Add {
        pillname: String,
        /// Time of day, e.g. 08:00
        dose_time: String,
        #[arg(long, default_value_t = 1)]
        repeat_days: i32,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        pillname: Option<String>,
        #[arg(long)]
        dose_time: Option<String>,
        #[arg(long)]
        repeat_days: Option<i32>,
    },
    Delete { id: Uuid },
}

struct App {
    config: Config,
    session: Session,
    seen: Arc<SeenStore>,
}

impl App {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        if let Some(base_url) = &cli.base_url {
            config.backend.base_url = base_url.clone();
        }

        let api = BackendClient::with_options(
            &config.backend.base_url,
            config.backend.timeout(),
            config.retry_config(),
        )?;
        let credentials = CredentialStore::load(config.credentials_path()?)?;

        let kv = KvStore::open(config.database_path()?)
            .context("Failed to open the local state database")?;
        let seen = Arc::new(SeenStore::with_capacity(
            Arc::new(kv),
            config.poller.seen_capacity,
        ));

        Ok(Self {
            session: Session::new(api, credentials).with_seen_store(seen.clone()),
            config,
            seen,
        })
    }

    async fn require_login(&self) -> anyhow::Result<SessionContext> {
        match self.session.restore().await? {
            Some(ctx) => Ok(ctx),
            None => bail!("Not logged in. Run `medalert login <email>` first"),
        }
    }

    fn presenter(&self) -> Arc<ConsolePresenter> {
        Arc::new(ConsolePresenter::new(self.config.notifications.enabled))
    }

    fn poller(&self) -> Arc<NotificationPoller> {
        let poller = NotificationPoller::new(
            Arc::new(self.session.api().clone()),
            self.presenter(),
            self.seen.clone(),
        )
        .with_title(self.config.poller.title.clone());
        Arc::new(poller)
    }

    /// Explicit id wins; otherwise whoever the stored session belongs to
    async fn poll_target(&self, user_id: Option<String>) -> medalert_core::Result<Option<String>> {
        if user_id.is_some() {
            return Ok(user_id);
        }
        Ok(self
            .session
            .restore()
            .await?
            .map(|ctx| ctx.user_id.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medalert=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let app = App::new(&cli)?;

    match cli.command {
        Commands::Login { email, password } => {
            let ctx = app.session.login(&email, &password).await?;
            println!("Logged in as {} ({})", email, ctx.user_id);
        }
        Commands::Register {
            name,
            email,
            password,
            role,
        } => {
            let response = app
                .session
                .register(&RegisterRequest {
                    name,
                    email,
                    password,
                    role,
                })
                .await?;
            println!("{} ({})", response.message, response.email);
        }
        Commands::Logout => {
            app.session.logout()?;
            println!("Logged out");
        }
        Commands::Init => {
            let path = match &cli.config {
                Some(path) => {
                    app.config.save_to(path)?;
                    path.clone()
                }
                None => {
                    app.config.save()?;
                    Config::config_path()?
                }
            };
            println!("Wrote {}", path.display());
        }
        Commands::Profile { name, email } => {
            if name.is_none() && email.is_none() {
                bail!("Nothing to change. Pass --name and/or --email");
            }
            let ctx = app.require_login().await?;
            let user = app
                .session
                .update_profile(&ctx, &UserUpdate { name, email })
                .await?;
            println!("Updated profile: {} <{}>", user.name, user.email);
        }
        Commands::Whoami => {
            let ctx = app.require_login().await?;
            match app.session.api().get_user(ctx.user_id).await {
                Ok(user) => println!("{} <{}> [{}] {}", user.name, user.email, user.role, user.id),
                Err(e) => {
                    tracing::warn!("Could not load profile: {}", e);
                    println!("{}", ctx.user_id);
                }
            }
        }
        Commands::Dashboard => {
            let ctx = app.require_login().await?;
            let dashboard = app.session.refresh_dashboard(&ctx).await;

            if let Some(profile) = &dashboard.profile {
                println!("👤 {} <{}>", profile.name, profile.email);
            }
            match &dashboard.adherence {
                Some(adherence) => {
                    println!(
                        "🔥 Streak: {} days | Weekly adherence: {:.0}%",
                        adherence.adherence_streak,
                        adherence.weekly_adherence * 100.0
                    );
                    if let Some(next) = adherence.next_dose.as_ref().and_then(|n| n.next_dose.as_deref()) {
                        println!("⏰ Next dose: {}", next);
                    }
                }
                None => println!("Adherence summary unavailable"),
            }
            println!("💊 Device: {}", dashboard.device_id());
            println!("\nSchedules ({}):", dashboard.schedules.len());
            for schedule in &dashboard.schedules {
                println!(
                    "  {}  {} every {} day(s)  [{}]",
                    schedule.dose_time, schedule.pillname, schedule.repeat_days, schedule.id
                );
            }
            println!("\nRecent logs:");
            for log in dashboard.medlogs.iter().take(5) {
                println!("  {}  {}  {}", log.scheduled_time, log.pillname, log.status);
            }
        }
        Commands::Devices => {
            let ctx = app.require_login().await?;
            let dashboard = app.session.refresh_dashboard(&ctx).await;
            if dashboard.devices.is_empty() {
                println!("No paired devices (schedules use {})", dashboard.device_id());
            }
            for device in &dashboard.devices {
                println!(
                    "{}  {}  {}  last seen {}",
                    device.chip_id,
                    device.name,
                    device.status,
                    device.last_seen.as_deref().unwrap_or("never")
                );
            }
        }
        Commands::Medlogs { limit } => {
            let ctx = app.require_login().await?;
            let logs = app.session.api().medlogs(ctx.user_id).await?;
            for log in logs.iter().take(limit) {
                println!(
                    "{}  {:<20} {:<10} {}",
                    log.scheduled_time, log.pillname, log.status, log.device_id
                );
            }
        }
        Commands::Schedules(command) => {
            let ctx = app.require_login().await?;
            run_schedule_command(&app, &ctx, command).await?;
        }
        Commands::RegisterToken { token } => {
            let ctx = app.require_login().await?;
            app.session.register_push_token(&ctx, &token).await?;
            println!("Push token registered");
        }
        Commands::Push { title, message } => {
            let handler = PushHandler::new(app.session.api().clone(), app.presenter());
            let push = PushMessage {
                notification: Some(PushNotification {
                    title,
                    body: Some(message),
                }),
                data: Default::default(),
            };
            if handler.on_message_received(&push).await == 0 {
                bail!("Notification was not shown");
            }
        }
        Commands::Poll { user_id } => {
            let target = match app.poll_target(user_id).await {
                Ok(target) => target,
                Err(e) if e.is_transient() => {
                    eprintln!("Poll deferred: {}", e);
                    return Ok(ExitCode::from(EXIT_RETRY_LATER));
                }
                Err(e) => return Err(e.into()),
            };
            let poller = app.poller();

            return Ok(match poller.poll(target.as_deref()).await {
                PollResult::Success(report) => {
                    println!(
                        "{} new, {} shown, {} already seen",
                        report.new_notifications,
                        report.presented(),
                        report.already_seen
                    );
                    ExitCode::SUCCESS
                }
                PollResult::RetryLater(reason) => {
                    eprintln!("Poll deferred: {}", reason);
                    ExitCode::from(EXIT_RETRY_LATER)
                }
                PollResult::PermanentFailure(reason) => {
                    eprintln!("Poll failed: {}", reason);
                    ExitCode::FAILURE
                }
            });
        }
        Commands::Watch { user_id } => {
            let Some(target) = app.poll_target(user_id).await? else {
                bail!("No user to watch for. Log in or pass --user-id");
            };
            let user_id = Uuid::parse_str(&target)
                .with_context(|| format!("Invalid user id: {}", target))?;
            let poller = app.poller();

            let policy = SchedulerPolicy {
                backoff_base: app.config.poller.backoff_base(),
                ..SchedulerPolicy::default()
            };
            let mut scheduler = TokioScheduler::new(policy);
            if app.config.poller.require_network {
                match TcpProbe::for_url(app.session.api().base_url(), app.config.backend.timeout()) {
                    Some(probe) => scheduler = scheduler.with_connectivity(Arc::new(probe)),
                    None => tracing::warn!("Backend URL has no host, skipping connectivity checks"),
                }
            }

            start_periodic_polling(&scheduler, poller, user_id, app.config.poller.interval());
            println!(
                "Watching for notifications every {} minute(s). Press Ctrl-C to stop.",
                app.config.poller.interval_minutes
            );

            tokio::signal::ctrl_c().await?;
            scheduler.cancel(POLL_JOB_NAME);
            println!("Stopped");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_schedule_command(
    app: &App,
    ctx: &SessionContext,
    command: ScheduleCommand,
) -> anyhow::Result<()> {
    match command {
        ScheduleCommand::List => {
            let schedules = app.session.api().schedules(ctx.user_id).await?;
            if schedules.is_empty() {
                println!("No schedules");
            }
            for schedule in schedules {
                println!(
                    "{}  {}  {} every {} day(s) on {}",
                    schedule.id,
                    schedule.dose_time,
                    schedule.pillname,
                    schedule.repeat_days,
                    schedule.device_id
                );
            }
        }
        ScheduleCommand::Add {
            pillname,
            dose_time,
            repeat_days,
        } => {
            let dashboard = app.session.refresh_dashboard(ctx).await;
            let created = app
                .session
                .create_schedule(ctx, &dashboard.devices, &pillname, &dose_time, repeat_days)
                .await?;
            println!("Created schedule {}", created.id);
        }
        ScheduleCommand::Update {
            id,
            pillname,
            dose_time,
            repeat_days,
        } => {
            let update = ScheduleUpdate {
                pillname,
                dose_time,
                repeat_days,
            };
            let updated = app.session.update_schedule(id, &update).await?;
            println!(
                "Updated {}: {} at {} every {} day(s)",
                updated.id, updated.pillname, updated.dose_time, updated.repeat_days
            );
        }
        ScheduleCommand::Delete { id } => {
            app.session.delete_schedule(id).await?;
            println!("Deleted schedule {}", id);
        }
    }
    Ok(())
}
