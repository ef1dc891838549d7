//! # Bottlemail: messages delivered at a time of your choosing
//!
//! Usage:
//!   bottlemail serve                      # API + scheduler (default port 5000)
//!   bottlemail serve --port 8080          # Custom port
//!   bottlemail sweep                      # One reconciliation pass
//!   bottlemail lottery                    # Draw the monthly lottery now
//!   bottlemail add-user --email a@b.c --firstname Ada --lastname Lovelace

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use bottle_core::config::{BottleConfig, expand_path};
use bottle_core::traits::MailTransport;
use bottle_mailbox::{Mailbox, MailboxContext, MailboxDb, MailboxJobs};
use bottle_scheduler::{
    LaneScheduler, QueueHandle, RetryPolicy, Runtime, SchedulerEngine, transport_from_config,
};

#[derive(Parser)]
#[command(
    name = "bottlemail",
    version,
    about = "🍾 Bottlemail — messages delivered at a time of your choosing"
)]
struct Cli {
    /// Config file (default: ~/.bottlemail/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the delivery scheduler
    Serve {
        /// Override the gateway port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Deliver every overdue message now
    Sweep,
    /// Run the points lottery now
    Lottery,
    /// Register a user
    AddUser {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        firstname: String,
        #[arg(long, default_value = "")]
        lastname: String,
    },
    /// Deactivate a user (no more mail, no lottery)
    DeactivateUser {
        #[arg(long)]
        id: i64,
    },
    /// Print the effective configuration
    ShowConfig,
}

/// Everything one process needs to run mailbox jobs.
struct Services {
    mailbox: Mailbox,
    engine: Arc<tokio::sync::Mutex<SchedulerEngine>>,
    runtime: Arc<Runtime>,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "bottlemail=debug,bottle_mailbox=debug,bottle_scheduler=debug,bottle_gateway=debug,tower_http=debug"
    } else {
        "bottlemail=info,bottle_mailbox=info,bottle_scheduler=info,bottle_gateway=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BottleConfig> {
    let mut config = match path {
        Some(path) => BottleConfig::load_from(path)?,
        None => BottleConfig::load()?,
    };
    config.apply_env_overrides();
    Ok(config)
}

fn open_db(config: &BottleConfig) -> Result<MailboxDb> {
    let path = if config.store.path == ":memory:" {
        config.store.path.clone()
    } else {
        let path = expand_path(&config.store.path);
        if let Some(parent) = std::path::Path::new(&path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        path
    };
    let db = MailboxDb::open(std::path::Path::new(&path))?;
    tracing::info!("🗄️ Mailbox store: {path}");
    Ok(db)
}

/// Wire store, queue, transport and runtime. `engine` decides whether
/// pending tasks come from the snapshot (serve) or start empty (one-shots).
fn build_services(config: &BottleConfig, engine: SchedulerEngine) -> Result<Services> {
    let db = Arc::new(open_db(config)?);
    let engine = Arc::new(tokio::sync::Mutex::new(engine));
    let transport: Arc<dyn MailTransport> = Arc::from(transport_from_config(&config.mail));
    let ctx = Arc::new(MailboxContext::new(
        db,
        Arc::new(QueueHandle::new(engine.clone())),
        transport,
        config,
    ));
    let runtime = Arc::new(Runtime::new(
        engine.clone(),
        Arc::new(LaneScheduler::from_config(&config.scheduler)),
        Arc::new(MailboxJobs::new(ctx.clone())),
        RetryPolicy::new(
            config.scheduler.retry_max_attempts,
            config.scheduler.retry_backoff_secs,
        ),
    ));
    Ok(Services {
        mailbox: Mailbox::new(ctx),
        engine,
        runtime,
    })
}

async fn serve(mut config: BottleConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.gateway.port = port;
    }
    let engine = SchedulerEngine::from_config(&config.scheduler)?;
    let services = build_services(&config, engine)?;
    bottle_mailbox::register_periodic(&mut *services.engine.lock().await, &config.scheduler);

    let worker = services
        .runtime
        .clone()
        .spawn(Duration::from_millis(config.scheduler.tick_interval_ms));

    let state = bottle_gateway::AppState::new(services.mailbox.clone(), &config.gateway)
        .with_scheduler(services.engine.clone(), services.runtime.lanes().clone());
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("🛑 Shutdown requested");
    };
    let result = bottle_gateway::start(state, &config.gateway, shutdown).await;

    // Pending tasks stay in the snapshot; overdue ones are swept on next start.
    services.engine.lock().await.close();
    worker.abort();
    result
}

/// Run due work (notifications the job just queued) before exiting.
async fn drain(services: &Services) -> usize {
    let mut executed = 0;
    loop {
        let n = services.runtime.run_due(Utc::now()).await;
        if n == 0 {
            return executed;
        }
        executed += n;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Serve { port } => serve(config, port).await?,
        Command::Sweep => {
            let services = build_services(&config, SchedulerEngine::new(config.scheduler.max_pending_tasks))?;
            let report = bottle_mailbox::sweeper::sweep(services.mailbox.context()).await;
            let notified = drain(&services).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            tracing::info!("🧹 Sweep done, {notified} follow-up task(s) executed");
        }
        Command::Lottery => {
            let services = build_services(&config, SchedulerEngine::new(config.scheduler.max_pending_tasks))?;
            let outcome = bottle_mailbox::lottery::run_lottery(services.mailbox.context()).await;
            drain(&services).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::AddUser {
            email,
            firstname,
            lastname,
        } => {
            let db = open_db(&config)?;
            let id = db.create_user(&email, &firstname, &lastname)?;
            println!("✅ User created: {email} (id {id})");
        }
        Command::DeactivateUser { id } => {
            let db = open_db(&config)?;
            if db.set_user_active(id, false)? {
                println!("✅ User {id} deactivated");
            } else {
                anyhow::bail!("No user with id {id}");
            }
        }
        Command::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
