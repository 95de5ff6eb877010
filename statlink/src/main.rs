//! statlink-agent - stream host statistics to a monitoring server
//!
//! This tool provides commands for:
//! - Checking the monitoring connection configuration
//! - Running a reporting agent until interrupted
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/statlink/config.toml (~/.config/statlink/config.toml)
//! - Logs: $XDG_STATE_HOME/statlink/statlink.log (~/.local/state/statlink/statlink.log)

mod sample;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use statlink_core::config::ServiceSection;
use statlink_core::{Config, MonitoringService, ServiceConfig, ServiceEvent};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "statlink-agent")]
#[command(about = "Stream host statistics to a monitoring server")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/statlink/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Command-line overrides for the `[service]` section
#[derive(ClapArgs)]
struct Overrides {
    /// Monitoring server URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token
    #[arg(long, global = true)]
    token: Option<String>,

    /// Report interval in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Log statistics sending failures
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show monitoring configuration
    Status,

    /// Connect and report sample statistics until Ctrl-C
    Run,
}

impl Overrides {
    fn apply(&self, section: &mut ServiceSection) {
        if let Some(endpoint) = &self.endpoint {
            section.endpoint = Some(endpoint.clone());
        }
        if let Some(token) = &self.token {
            section.credential = Some(token.clone());
        }
        if let Some(interval_ms) = self.interval_ms {
            section.interval_ms = interval_ms;
        }
        if self.verbose {
            section.verbose = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;
    args.overrides.apply(&mut config.service);

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Run => cmd_run(&config).await,
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    let service = &config.service;

    println!("Monitoring Configuration");
    println!("========================");
    println!();
    println!(
        "Endpoint:        {}",
        service.endpoint.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Credential:      {}",
        if service.credential.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Interval:        {}ms", service.interval_ms);
    println!("Verbose:         {}", service.verbose);
    println!("Log File:        {}", Config::log_path().display());

    println!();
    match service.validate() {
        Ok(()) => println!("Status: Ready to report"),
        Err(e) => {
            println!("Status: Not ready ({})", e);
            println!();
            println!("Configure the service in config.toml:");
            println!();
            println!("  [service]");
            println!("  endpoint = \"ws://localhost:9001\"");
            println!("  credential = \"your-service-token\"");
            println!("  interval_ms = 5000");
        }
    }

    Ok(())
}

async fn cmd_run(config: &Config) -> Result<()> {
    let service_config =
        ServiceConfig::try_from(&config.service).context("invalid service configuration")?;

    let _log_guard =
        statlink_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(
        endpoint = %service_config.endpoint(),
        interval_ms = service_config.interval().as_millis() as u64,
        "statlink-agent starting"
    );
    println!("Reporting to {}", service_config.endpoint());

    let mut service = MonitoringService::new(service_config, sample::SampleStats::new());
    let mut events = service
        .take_events()
        .context("service events already taken")?;
    service.connect();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            Some(event) = events.recv() => match event {
                ServiceEvent::Opened => println!("Connected"),
                ServiceEvent::Closed => {}
                ServiceEvent::Result(data) => println!("Result: {}", data),
                ServiceEvent::Error(e) => {
                    // Repeated refusals are already logged; print only the first.
                    if e.connection_attempts().map_or(true, |attempts| attempts == 0) {
                        eprintln!("Error: {}", e);
                    }
                }
            },
        }
    }

    println!("Shutting down...");
    service.terminate().await;
    tracing::info!("statlink-agent stopped");

    Ok(())
}
