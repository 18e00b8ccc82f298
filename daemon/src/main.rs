mod config;
mod context;
mod event;
mod launcher;
mod network_monitor;
mod orchestrator;
mod paths;
mod poll;
mod probe;
mod process_monitor;
mod process_table;
mod report;
mod sequencer;
mod status;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::config::{ExecutionMode, FileSettings};
use crate::context::Collaborators;
use crate::event::DaemonEvent;
use crate::launcher::OsLauncher;
use crate::orchestrator::{Orchestrator, Stage};
use crate::probe::NetProbe;
use crate::process_table::SysinfoProcessTable;
use crate::report::LogLevel;

/// Waits for the network, launches programs, then waits for a trigger
/// process and launches the next set.
#[derive(Parser)]
#[command(name = "launchwatch", version, about)]
struct Args {
    /// Config file to use instead of the per-user default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Launch the enabled programs of one mode (network, trigger or
    /// launcher-only) and exit.
    #[arg(long, value_name = "MODE")]
    launch: Option<ExecutionMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args.config.unwrap_or_else(paths::config_file_path);
    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
    }
    let settings = FileSettings::new(config_path.clone());
    tracing::info!(config = %settings.path().display(), "using config file");

    // ── Core ──────────────────────────────────────────────────────────────────
    let collaborators = Collaborators {
        settings: Arc::new(settings),
        probe: Arc::new(NetProbe::new()?),
        processes: Arc::new(SysinfoProcessTable::new()),
        launcher: Arc::new(OsLauncher),
    };
    let orchestrator = Orchestrator::new(collaborators);
    orchestrator.on_log_message(|event| {
        println!("{:<5} {}", event.level.tag(), event.format_line());
    });

    if let Some(mode) = args.launch {
        let summary = orchestrator.launch_enabled_programs_now(mode).await;
        for report in &summary.reports {
            tracing::info!(program = %report.name, outcome = ?report.outcome, "launch result");
        }
        if summary.failed() > 0 {
            anyhow::bail!("{} {} program(s) failed to launch", summary.failed(), mode.label());
        }
        return Ok(());
    }

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path_for(&config_path);
    let mut current_status = status::DaemonStatus::new();

    let auto_start = match config::load_or_default(&config_path) {
        Ok(config) => config.general.auto_start_monitoring,
        Err(e) => {
            tracing::error!("config error (monitors will retry every check): {e:#}");
            current_status.error = Some(format!("{e:#}"));
            true
        }
    };
    status::write_status(&status_path, &current_status);

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    {
        let tx = event_tx.clone();
        orchestrator.on_stage_changed(move |stage| {
            if tx.try_send(DaemonEvent::StageChanged(stage)).is_err() {
                tracing::warn!(?stage, "event queue full, stage change not recorded");
            }
        });
        let tx = event_tx.clone();
        orchestrator.on_completed(move || {
            if tx.try_send(DaemonEvent::MonitoringCompleted).is_err() {
                tracing::warn!("event queue full, completion not recorded");
            }
        });
    }

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    tracing::info!("launchwatch v{} started", env!("CARGO_PKG_VERSION"));

    if auto_start {
        orchestrator.start_all();
    } else {
        tracing::info!("auto start is off; waiting for Ctrl+C");
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::SettingsReloaded(Ok(())) => {
                tracing::info!("config reloaded");
                orchestrator.report(LogLevel::Info, "Settings reloaded.");
                current_status.error = None;
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::SettingsReloaded(Err(e)) => {
                tracing::error!("config reload failed: {e}");
                orchestrator.report(LogLevel::Error, format!("Settings reload failed: {e}"));
                current_status.error = Some(e);
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::StageChanged(stage) => {
                tracing::info!(?stage, "stage changed");
                current_status.stage = stage;
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::MonitoringCompleted => {
                tracing::info!("monitoring chain completed");
                current_status.last_completed = Some(chrono::Local::now().to_rfc3339());
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::Shutdown => {
                tracing::info!(stage = ?orchestrator.stage(), "shutting down");
                orchestrator.shutdown().await;
                current_status.stage = Stage::Idle;
                status::write_status(&status_path, &current_status);
                break;
            }
        }
    }

    Ok(())
}
