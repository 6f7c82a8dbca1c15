//! `mlpppd` - the multilink PPP daemon.
//!
//! Loads the layered configuration, applies command-line overrides, opens
//! the tunnel, the datalinks and the admin server, then runs the event
//! loop until SIGINT or SIGTERM has taken the bundle down.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use mlppp_config::Config;
use mlppp_daemon::{Daemon, DaemonError, settings};

/// Multilink PPP daemon.
#[derive(Parser, Debug)]
#[command(name = "mlpppd")]
#[command(author, version, about = "Multilink PPP daemon")]
struct Args {
    /// Extra configuration file, merged over the system and user files.
    #[arg(short, long, env = "MLPPP_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Tunnel unit to use instead of the first free one.
    #[arg(long)]
    unit: Option<u32>,

    /// Listen for admin sessions on this local socket.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Listen for admin sessions on this TCP port.
    #[arg(long)]
    port: Option<u16>,

    /// Bring interactive links up at startup as well.
    #[arg(long)]
    foreground_open: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "mlpppd:".red().bold());
            let code = e
                .downcast_ref::<DaemonError>()
                .map_or(1, DaemonError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        },
    }
}

async fn run(args: Args) -> Result<()> {
    let resolved = Config::load(args.config.as_deref()).context("loading configuration")?;
    let mut config = resolved.config;
    apply_overrides(&mut config, &args);
    mlppp_config::validate::validate(&config).context("command-line overrides")?;

    let log_config = settings::log_config(&config.logging, args.verbose);
    if let Err(e) = mlppp_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
    for file in &resolved.loaded_files {
        info!(path = %file, "configuration file");
    }

    let mut daemon = Daemon::from_config(&config)?;
    let started = daemon.start_links(args.foreground_open);
    println!(
        "{}",
        format!(
            "mlpppd running ({} link(s), {} started, admin: {})",
            daemon.bundle().links().len(),
            started,
            daemon.server().state()
        )
        .cyan()
        .bold()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let signals = tokio::spawn(watch_signals(Arc::clone(&shutdown)));

    let flag = Arc::clone(&shutdown);
    let outcome = tokio::task::spawn_blocking(move || daemon.run(&flag))
        .await
        .context("event loop thread panicked")?;
    signals.abort();
    outcome?;

    println!("{}", "mlpppd stopped".green().bold());
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(unit) = args.unit {
        config.bundle.unit = Some(unit);
    }
    if let Some(port) = args.port {
        config.server.port = Some(port);
        if args.socket.is_none() {
            config.server.socket = None;
        }
    }
    if let Some(socket) = &args.socket {
        config.server.socket = Some(socket.clone());
    }
}

async fn watch_signals(shutdown: Arc<AtomicBool>) {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "cannot watch SIGTERM");
            None
        },
    };
    let terminate = async {
        match term.as_mut() {
            Some(s) => {
                s.recv().await;
            },
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        () = terminate => info!("SIGTERM received"),
    }
    println!("\n{}", "Shutting down...".yellow());
    shutdown.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_override_replaces_config_socket() {
        let mut config = Config::default();
        config.server.socket = Some("/var/run/mlppp.sock".into());
        let args = Args::parse_from(["mlpppd", "--port", "6671", "--unit", "3"]);
        apply_overrides(&mut config, &args);
        assert_eq!(config.server.port, Some(6671));
        assert_eq!(config.server.socket, None);
        assert_eq!(config.bundle.unit, Some(3));
    }

    #[test]
    fn test_socket_override_wins() {
        let mut config = Config::default();
        let args = Args::parse_from(["mlpppd", "--socket", "/tmp/m.sock", "--port", "6671"]);
        apply_overrides(&mut config, &args);
        assert_eq!(config.server.socket.as_deref(), Some(std::path::Path::new("/tmp/m.sock")));
    }
}
