#![deny(unsafe_code)]

//! pollwire CLI: runs a polling session and controls a running one.

mod handlers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pollwire_config::AppConfig;
use pollwire_core::control::{self, ControlClient, ControlState};
use pollwire_core::{HttpTransport, Session, SessionOptions};

/// pollwire: tagged message streams over HTTP polling.
#[derive(Parser)]
#[command(name = "pollwire", version = pollwire_core::build_info::VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "pollwire.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session against the configured endpoint until stopped.
    Run,

    /// Stop a running session.
    Stop,

    /// Show status of a running session.
    Status,

    /// Queue a payload on a running session.
    Write {
        /// Outbound tag.
        tag: String,
        /// Payload text.
        data: String,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Run => cmd_run(config).await?,
        Commands::Stop => cmd_stop(&config).await?,
        Commands::Status => cmd_status(&config).await?,
        Commands::Write { tag, data } => cmd_write(&config, &tag, &data).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

async fn cmd_run(config: AppConfig) -> Result<()> {
    let transport = HttpTransport::from_config(&config.endpoint)?;
    let options = SessionOptions::from_config(&config.session)?;
    let session = Session::new(Arc::new(transport), options);
    handlers::register(&session, &config.handlers)?;

    info!(
        endpoint = %config.endpoint.url,
        version = %pollwire_core::build_info::version_string(),
        "Starting pollwire session"
    );

    let control_task = if config.control.enabled {
        let socket_path = control::socket_path_from_config(&config);
        let state = Arc::new(ControlState::new(session.clone(), config.clone()));
        Some(tokio::spawn(async move {
            if let Err(e) = control::server::serve(&socket_path, state).await {
                warn!(error = %e, "Control server failed");
            }
        }))
    } else {
        None
    };

    {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, stopping session");
                session.stop();
            }
        });
    }

    let result = session.run().await;

    if let Some(task) = control_task {
        join_control(task).await;
    }

    let stats = session.stats();
    info!(
        batches_sent = stats.batches_sent,
        batches_received = stats.batches_received,
        send_errors = stats.send_errors,
        fetch_errors = stats.fetch_errors,
        "Session finished"
    );
    result.context("session ended with an error")
}

/// Wait for the control server task, logging a panic or cancellation.
async fn join_control(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Control server task failed");
            false
        }
    }
}

fn client(config: &AppConfig) -> ControlClient {
    ControlClient::new(control::socket_path_from_config(config))
}

async fn cmd_stop(config: &AppConfig) -> Result<()> {
    let resp = client(config).stop().await?;
    println!("{}", resp.message);
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let status = client(config).status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_write(config: &AppConfig, tag: &str, data: &str) -> Result<()> {
    let resp = client(config).write(tag, data).await?;
    println!("queued under {tag:?} ({} pending)", resp.pending);
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}
