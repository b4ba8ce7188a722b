//! `inferno-cli` – Inferno smoker bridge command line
//!
//! This binary is the entry point of the device side of Inferno.  It:
//!
//! 1. Initialises structured logging (and OTLP export when configured).
//! 2. Loads `~/.inferno/config.toml` with `INFERNO_*` overrides.
//! 3. Runs one of the subcommands: `run` (the cloud bridge), `probe` (the
//!    sensor pipeline on simulated inputs), `templog` (CSV status log) or
//!    `init` (write a default config).
//! 4. Intercepts **Ctrl-C** and shuts every task down cleanly.

mod cli;
mod config;
mod probe;
mod templog;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tracing::{info, warn};

use inferno_hal::{RtdArray, SAMPLE_PERIOD};
use inferno_runtime::{
    init_tracing, Bridge, ControllerClient, LocalController, LoopbackHub, Shutdown,
    SmokerController,
};

use crate::cli::{Cli, Command};

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); INFERNO_LOG_FORMAT=json switches to
    // newline-delimited JSON.  User-facing output still uses println!.
    let _tracing = init_tracing("inferno");

    let cli = Cli::parse();
    if !matches!(cli.command, Command::Templog { .. }) {
        print_banner();
    }

    // ── Shutdown latch ────────────────────────────────────────────────────
    let (trigger, shutdown) = Shutdown::new();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        trigger.trigger();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start async runtime: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Init { force } => init(force),
        Command::Run { loopback, simulate } => {
            runtime.block_on(run_bridge(loopback, simulate, shutdown))
        }
        Command::Probe {
            grill_ohms,
            probe_ohms,
            model,
            seconds,
        } => {
            let adc = probe::sim_adc(grill_ohms, &probe_ohms);
            runtime.block_on(probe::run(adc, model.into(), seconds, shutdown));
            Ok(())
        }
        Command::Templog { url, interval_secs } => {
            runtime.block_on(run_templog(url, interval_secs, shutdown))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn init(force: bool) -> Result<(), String> {
    let path = config::config_path();
    if path.exists() && !force {
        return Err(format!(
            "Config already exists at {}; pass --force to overwrite",
            path.display()
        ));
    }
    config::save(&config::Config::default())?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    println!(
        "  Add your device connection strings to {} before `{}`.",
        "connection_strings".bold(),
        "inferno run".bold()
    );
    Ok(())
}

async fn run_bridge(loopback: bool, simulate: bool, shutdown: Shutdown) -> Result<(), String> {
    let cfg = config::load()?.ok_or_else(|| {
        format!(
            "No config at {}; run `inferno init` first",
            config::config_path().display()
        )
    })?;
    let credentials = cfg.credentials()?;

    if !loopback {
        return Err(
            "This build bundles no cloud hub transport; pass --loopback for a bench run".into(),
        );
    }
    println!(
        "  Device {} with {} credential(s) against the {} endpoint",
        cfg.device_id.bold(),
        credentials.len(),
        "loopback".yellow()
    );

    let controller: Arc<dyn SmokerController> = if simulate {
        let sensors = Arc::new(RtdArray::default());
        tokio::spawn(sensors.clone().run_sampling(
            probe::sim_adc(Some(1373.0), &[1208.0]),
            SAMPLE_PERIOD,
            {
                let shutdown = shutdown.clone();
                async move { shutdown.cancelled().await }
            },
        ));
        info!("serving controller data from simulated sensors");
        Arc::new(LocalController::new(sensors))
    } else {
        let client = ControllerClient::new(&cfg.controller_url).map_err(|e| e.to_string())?;
        info!(controller_url = client.base_url(), "using controller API");
        Arc::new(client)
    };

    let hub = LoopbackHub::new();
    let bridge = Bridge::new(
        cfg.bridge_config(),
        credentials,
        Arc::new(hub.factory()),
        controller,
    );
    bridge.run(shutdown).await.map_err(|e| e.to_string())?;

    println!(
        "  {} Bridge stopped after {} telemetry record(s).",
        "✓".green(),
        hub.published_count()
    );
    Ok(())
}

async fn run_templog(
    url: Option<String>,
    interval_secs: u64,
    shutdown: Shutdown,
) -> Result<(), String> {
    let url = match url {
        Some(url) => url,
        None => config::load()?.unwrap_or_default().controller_url.clone(),
    };
    let client = ControllerClient::new(&url).map_err(|e| e.to_string())?;
    let mut out = std::io::stdout().lock();
    templog::run(
        &client,
        Duration::from_secs(interval_secs.max(1)),
        &mut out,
        shutdown,
    )
    .await
    .map_err(|e| format!("Failed to write log: {}", e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _       ____               "#.bold().red());
    println!("{}", r#"  (_)___  / __/__  _________  ____ "#.bold().red());
    println!("{}", r#" / / __ \/ /_/ _ \/ ___/ __ \/ __ \"#.bold().yellow());
    println!("{}", r#"/ / / / / __/  __/ /  / / / / /_/ /"#.bold().yellow());
    println!("{}", r#"/_/_/ /_/_/  \___/_/  /_/ /_/\____/ "#.bold().yellow());
    println!();
    println!("  {} {}",
        "Inferno".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Smoker controller cloud bridge");
    println!();
}
