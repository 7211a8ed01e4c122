use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use noip_core::{config, credential, NoipConfig, NoipError};
use noip_scheduler::{
    JobSpec, JobStore, LifecycleManager, SchedulerCore, SchedulerError, SystemClock, UpdateArgs,
    UPDATE_JOB_ID,
};
use tracing::{error, info, warn};

mod client;
mod logging;

use client::NoIpClient;

/// Keeps a No-IP hostname pointed at this machine.
#[derive(Debug, Parser)]
#[command(name = "noip-updater", version, about)]
struct Cli {
    /// Config file (default: $NOIP_CONFIG, then ~/.noip/noip.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the updater until interrupted (the default).
    Run {
        /// Overwrite the registered job from the current configuration.
        #[arg(long)]
        replace: bool,
    },
    /// Write the account credential and hostname to the config file.
    Setup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Hostname to keep updated, e.g. mytest.testdomain.com.
        #[arg(long)]
        hostname: String,
        /// Minutes between updates.
        #[arg(long, default_value_t = config::DEFAULT_INTERVAL_MINUTES)]
        interval: u32,
        /// Report this address instead of the detected one.
        #[arg(long)]
        ip: Option<String>,
    },
    /// Show the registered job and when it fires next.
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run { replace: false }) {
        Command::Run { replace } => run(cli.config.as_deref(), replace).await,
        Command::Setup {
            username,
            password,
            hostname,
            interval,
            ip,
        } => setup(cli.config.as_deref(), &username, &password, hostname, interval, ip),
        Command::Status => status(cli.config.as_deref()),
    }
}

async fn run(config_path: Option<&str>, replace: bool) -> anyhow::Result<()> {
    let config = NoipConfig::load(config_path)?;
    config.validate()?;

    let log_guard = logging::init(&config.log)?;
    info!(
        "=== No-IP Updater v{} ({}) ===",
        env!("CARGO_PKG_VERSION"),
        env!("NOIP_GIT_SHA")
    );

    let store = JobStore::open(&config.database.path)
        .map_err(|e| startup_error(&config.database.path, e))?;
    let client = NoIpClient::new(&config.http, config.noip.ip.clone())
        .map_err(|e| fatal(e.into()))?;
    let core = SchedulerCore::new(Arc::new(client), Arc::new(SystemClock))
        .with_misfire_grace(Duration::from_secs(config.scheduler.misfire_grace_secs));

    let spec = JobSpec {
        id: UPDATE_JOB_ID.to_string(),
        interval_minutes: config.noip.interval_minutes,
        arguments: UpdateArgs::new(config.noip.credential.clone(), config.noip.hostname.clone()),
    };
    let mut manager = LifecycleManager::start(spec, store, core, replace)
        .map_err(|e| startup_error(&config.database.path, e))?;
    if let Some(guard) = log_guard {
        manager.release_on_shutdown(guard);
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received");
        let _ = shutdown_tx.send(true);
    });

    manager.run(shutdown_rx).await;
    manager
        .shutdown()
        .map_err(|e| fatal(NoipError::Storage(e.to_string())))?;
    Ok(())
}

/// Classify a scheduler error raised while bringing the agent up.
fn startup_error(db_path: &str, err: SchedulerError) -> anyhow::Error {
    let err = match err {
        SchedulerError::InvalidJob(reason) => NoipError::Config(reason),
        other => NoipError::Storage(format!("job store at {db_path}: {other}")),
    };
    fatal(err)
}

/// Log `err` with its code and hand it back to end the process.
fn fatal(err: NoipError) -> anyhow::Error {
    error!(code = err.code(), "{err}");
    err.into()
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM. Never resolves if no handler can be installed.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C; stop the process with SIGKILL");
        std::future::pending::<()>().await;
    }
}

fn setup(
    config_path: Option<&str>,
    username: &str,
    password: &str,
    hostname: String,
    interval: u32,
    ip: Option<String>,
) -> anyhow::Result<()> {
    let path = config::resolve_path(config_path);
    let mut config = NoipConfig::load(Some(path.as_str()))
        .with_context(|| format!("existing config at {path} is unreadable; fix or remove it"))?;
    config.noip.credential = credential::encode(username, password);
    config.noip.hostname = hostname;
    config.noip.interval_minutes = interval;
    config.noip.ip = ip;
    config.validate()?;
    config.save(Path::new(&path))?;

    println!(
        "Configuration was saved to {path}. Start the updater with `noip-updater run` \
         (or `systemctl start noip-updater.service`)."
    );
    Ok(())
}

fn status(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = NoipConfig::load(config_path)?;
    if !Path::new(&config.database.path).exists() {
        println!("no job registered (no job store at {})", config.database.path);
        return Ok(());
    }
    let store = JobStore::open_read_only(&config.database.path)
        .map_err(|e| NoipError::Storage(format!("job store at {}: {e}", config.database.path)))?;

    let Some(job) = store.load(UPDATE_JOB_ID)? else {
        println!("no job registered");
        return Ok(());
    };

    let account = credential::username(job.arguments.credential())
        .unwrap_or_else(|_| "<unreadable credential>".to_string());
    println!("job:       {}", job.id);
    println!("account:   {account}");
    println!("hostname:  {}", job.arguments.hostname());
    println!("interval:  {} min", job.interval_minutes);
    match job.next_fire_time {
        Some(next) => {
            let secs = (next - chrono::Utc::now()).num_seconds();
            if secs >= 0 {
                println!("next fire: {next} (in {}m {}s)", secs / 60, secs % 60);
            } else {
                println!("next fire: {next} (overdue by {}s)", -secs);
            }
        }
        None => println!("next fire: not scheduled"),
    }
    Ok(())
}
