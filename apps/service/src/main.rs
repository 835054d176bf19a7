use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use hawk_service::config::Config;
use hawk_service::database::models::{Monitor, NotificationSettings, StatusPage};
use hawk_service::database::{self, Repository};
use hawk_service::monitoring::{CheckInterval, DueCheckScheduler, HttpProber, MonitoringService};
use hawk_service::notifications::{Notifier, SlackWebhookTransport};

/// Hawk - HTTP uptime monitoring with incidents and Slack alerts
#[derive(Parser)]
#[command(name = "hawk")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $HAWK_CONFIG or ~/.config/hawk/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check due monitors on every scheduler tick until Ctrl-C
    Run,

    /// Check every due monitor once
    CheckAll,

    /// Check one monitor now
    Check { monitor: Uuid },

    /// List monitors that are due for a check
    Due,

    /// Show recent checks of a monitor
    History {
        monitor: Uuid,

        /// Number of checks (max 100)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Register an HTTP monitor
    AddMonitor {
        #[arg(long)]
        name: String,

        #[arg(long)]
        url: String,

        /// Owner of the monitor
        #[arg(long)]
        user: String,

        /// Consecutive failures before the monitor is down (1-10)
        #[arg(long, default_value_t = 3)]
        threshold: u32,

        /// Check interval in minutes
        #[arg(long, conflicts_with = "cron")]
        every: Option<u64>,

        /// Schedule as `*/N * * * *`
        #[arg(long)]
        cron: Option<String>,
    },

    /// Create a status page
    AddStatusPage {
        #[arg(long)]
        name: String,

        #[arg(long)]
        user: String,

        #[arg(long)]
        description: Option<String>,
    },

    /// Show a monitor on a status page
    Attach { status_page: Uuid, monitor: Uuid },

    /// List open incidents
    Incidents,

    /// Open an incident by hand
    OpenIncident {
        status_page: Uuid,

        #[arg(long)]
        title: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        monitor: Option<Uuid>,
    },

    /// Resolve an incident
    ResolveIncident { incident: Uuid },

    /// Save Slack settings for a user
    ConfigureSlack {
        user: String,

        #[arg(long)]
        webhook: Option<String>,

        #[arg(long)]
        channel: Option<String>,

        /// Keep settings but stop sending
        #[arg(long)]
        disable: bool,

        /// Also notify when monitors recover
        #[arg(long)]
        on_up: bool,
    },

    /// Send a test message to a user's Slack webhook
    TestNotification {
        user: String,

        #[arg(long)]
        message: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_ref()).context("failed to load config")?;
    logger::init_with(&config.logging.level, config.logging.format.parse().unwrap_or_default());

    if let Commands::Config = cli.command {
        println!("{config}");
        return Ok(());
    }

    let repository: Arc<dyn Repository> = Arc::new(database::open_database(&config.database).await?);
    let transport = Arc::new(SlackWebhookTransport::new(config.probe.timeout())?);
    let notifier = Arc::new(Notifier::new(repository.clone(), transport));
    let prober = Arc::new(HttpProber::new(config.probe.timeout(), &config.probe.user_agent)?);
    let service = Arc::new(MonitoringService::new(repository.clone(), prober, notifier));
    let scheduler = Arc::new(DueCheckScheduler::new(service.clone(), config.scheduler.batch_size));

    match cli.command {
        Commands::Run => {
            info!("Checking due monitors every {}s", config.scheduler.tick_seconds);
            let handle = scheduler.spawn_periodic(config.scheduler.tick());
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            handle.abort();
        }
        Commands::CheckAll => print_json(&scheduler.check_all_due().await?)?,
        Commands::Check { monitor } => print_json(&service.check_monitor(monitor).await?)?,
        Commands::Due => print_json(&scheduler.list_due_monitors().await?)?,
        Commands::History { monitor, limit } => print_json(&service.check_history(monitor, limit).await?)?,
        Commands::AddMonitor { name, url, user, threshold, every, cron } => {
            let interval = match (every, cron) {
                (Some(minutes), _) => CheckInterval::from_minutes(minutes.max(1)),
                (None, Some(expr)) => CheckInterval::from_cron_or(&expr, config.scheduler.default_interval()),
                (None, None) => config.scheduler.default_interval(),
            };
            let monitor = Monitor::new(name, url, user).with_threshold(threshold).with_interval(interval);
            service.register_monitor(&monitor).await?;
            print_json(&monitor)?;
        }
        Commands::AddStatusPage { name, user, description } => {
            let page = StatusPage { description, ..StatusPage::new(name, user) };
            repository.save_status_page(&page).await?;
            print_json(&page)?;
        }
        Commands::Attach { status_page, monitor } => {
            repository.attach_monitor(status_page, monitor).await?;
            println!("Attached {monitor} to {status_page}");
        }
        Commands::Incidents => print_json(&repository.list_open_incidents().await?)?,
        Commands::OpenIncident { status_page, title, description, monitor } => {
            let incident = service.incidents().open_incident(status_page, &title, description, monitor).await?;
            print_json(&incident)?;
        }
        Commands::ResolveIncident { incident } => {
            print_json(&service.incidents().resolve_incident(incident).await?)?;
        }
        Commands::ConfigureSlack { user, webhook, channel, disable, on_up } => {
            let current = repository
                .notification_settings(&user)
                .await?
                .unwrap_or_else(|| NotificationSettings::defaults_for(user.as_str()));
            let settings = NotificationSettings {
                slack_enabled: !disable,
                slack_webhook_url: webhook.or(current.slack_webhook_url.clone()),
                slack_channel: channel.or(current.slack_channel.clone()),
                on_monitor_up: on_up || current.on_monitor_up,
                ..current
            };
            repository.save_notification_settings(&settings).await?;
            print_json(&settings)?;
        }
        Commands::TestNotification { user, message } => {
            service.send_test_notification(&user, message.as_deref()).await?;
            println!("Test notification sent to {user}");
        }
        Commands::Config => {}
    }

    Ok(())
}
