//! # Dunning: automated payment reminders
//!
//! Sends escalating reminder emails for unpaid invoices on a daily schedule.
//!
//! Usage:
//!   dunning serve                      # API + daily scheduler
//!   dunning run-batch                  # One reminder batch now, then exit
//!   dunning send-now 42 --step 2       # Manual reminder for invoice 42
//!   dunning import invoices.csv        # Bulk import clients and invoices
//!   dunning init-config                # Write the default config file

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dunning_core::DunningConfig;
use dunning_gateway::AppState;
use dunning_scheduler::{
    EscalationPolicy, ReminderRunner, ReminderTemplates, SchedulerEngine, SqliteStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dunning",
    version,
    about = "📬 Dunning: automated payment reminders for unpaid invoices"
)]
struct Cli {
    /// Config file (default: ~/.dunning/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API and the daily reminder scheduler
    Serve,
    /// Run one reminder batch now and print the report
    RunBatch,
    /// Send a reminder for one invoice immediately
    SendNow {
        invoice_id: i64,
        /// Step to send (default: lowest step not yet sent)
        #[arg(long)]
        step: Option<u32>,
    },
    /// Import clients and invoices from a CSV file
    Import { file: PathBuf },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "dunning=debug,dunning_scheduler=debug,dunning_gateway=debug,dunning_channels=debug,tower_http=debug"
    } else {
        "dunning=info,dunning_scheduler=info,dunning_gateway=info,dunning_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(DunningConfig::default_path);

    match cli.command {
        Command::InitConfig { force } => {
            if config_path.exists() && !force {
                println!("⚠️  {} already exists (use --force to overwrite).", config_path.display());
                return Ok(());
            }
            DunningConfig::default().save_to(&config_path)?;
            println!("✅ Config written to {}", config_path.display());
        }
        Command::Import { file } => {
            let (_, store) = open(&config_path)?;
            let data = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let report = dunning_gateway::import_csv(&store, &data, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::RunBatch => {
            let (config, store) = open(&config_path)?;
            let engine = build_engine(&config, store)?;
            let report = engine.run_now(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SendNow { invoice_id, step } => {
            let (config, store) = open(&config_path)?;
            let engine = build_engine(&config, store)?;
            let outcome = engine
                .runner()
                .send_reminder_now(invoice_id, step, Utc::now())
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Serve => {
            let (config, store) = open(&config_path)?;
            let engine = Arc::new(build_engine(&config, store.clone())?);
            if config.scheduler.enabled {
                tokio::spawn(dunning_scheduler::spawn_scheduler(engine.clone()));
            } else {
                tracing::info!("⏸️ Scheduler disabled, reminders only go out on manual triggers");
            }
            let state = Arc::new(AppState::new(config, store, engine));
            dunning_gateway::start(state).await?;
        }
    }
    Ok(())
}

/// Load config (file, then env overrides) and open the database.
fn open(config_path: &Path) -> Result<(DunningConfig, Arc<SqliteStore>)> {
    let config = DunningConfig::load(config_path)?;
    let store = SqliteStore::open(&config.database.resolved_path()).context("opening database")?;
    Ok((config, Arc::new(store)))
}

/// Validate the escalation policy and templates, then wire the runner.
fn build_engine(config: &DunningConfig, store: Arc<SqliteStore>) -> Result<SchedulerEngine> {
    let policy = EscalationPolicy::from_config(&config.escalation)?;
    let templates = ReminderTemplates::new(&config.escalation.steps, &config.email.sender_name)?;
    let dispatcher = dunning_channels::from_config(&config.email)?;
    tracing::info!(
        "📋 Escalation policy: {} step(s) at +{} days",
        policy.steps().len(),
        policy
            .steps()
            .iter()
            .map(|s| s.offset_days.to_string())
            .collect::<Vec<_>>()
            .join("/+")
    );

    let runner = ReminderRunner::new(store, dispatcher, policy, templates)
        .with_send_timeout(Duration::from_secs(config.email.timeout_secs))
        .with_max_concurrent(config.scheduler.max_concurrent_sends);
    Ok(SchedulerEngine::new(Arc::new(runner), &config.scheduler)?)
}
