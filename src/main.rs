// Geekworm X728 UPS Daemon
// License: GPL-3.0

use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

use x728::config::{Config, DEFAULT_CONFIG_PATH};
use x728::daemon::{Backend, Daemon};

/// Power-loss detection, battery telemetry and safe shutdown for the Geekworm X728 UPS
#[derive(Parser, Debug)]
#[command(name = "x728d", version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Run against a simulated board instead of the GPIO/I2C hardware
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

async fn stop_requested() {
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM ({}), only Ctrl-C will stop the daemon", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    info!("--- Geekworm X728 UPS daemon v{} ---", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&args.config)?;
    let backend = if args.dry_run {
        info!("Dry run: using simulated board on the session bus");
        config.dbus.session = true;
        Backend::simulated()
    } else {
        Backend::Hardware
    };

    let daemon = Daemon::start(config, &backend);
    daemon.run(stop_requested()).await
}
