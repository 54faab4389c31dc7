//! rover-supervisor — the on-rover daemon. Wires together the four
//! execution contexts of §5 (serial reader, correction link, supervisor
//! tick, motor watchdog) around a real serial receiver port and a real
//! correction caster TCP session.
//!
//! The HTTP/REST control surface is an external collaborator (spec §1,
//! out of scope here); this binary only runs the control loop and, for a
//! standalone rover with no external layer attached yet, accepts an
//! optional waypoints file on the command line so it has something to
//! navigate to.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{split, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info, warn};

use rover_core::config::RoverConfig;
use rover_core::correction_link::{run_correction_link, CasterMetrics};
use rover_core::motor::{run_watchdog, MotorSink};
use rover_core::position_store::PositionStore;
use rover_core::receiver::{run_receiver, ReceiverHealth};
use rover_core::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "rover-supervisor", about = "RTK rover navigation daemon")]
struct Args {
    /// Config file path (TOML). Missing file falls back to built-in defaults.
    #[arg(short, long, default_value = "rover.toml")]
    config: String,
    /// Optional waypoints file: one "lat,lon[,name]" per line.
    #[arg(short, long)]
    waypoints: Option<PathBuf>,
    /// Loop the waypoint path once the last one is reached.
    #[arg(long)]
    loop_path: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rover_supervisor=info,rover_core=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config).unwrap_or_default();
    let config = RoverConfig::from_toml_str(&config_str)
        .map_err(|e| anyhow::anyhow!("invalid {}: {e}", args.config))?;
    config.validate()?;

    info!(port = %config.receiver.port, baud = config.receiver.baud, "rover-supervisor starting");

    let position_store = PositionStore::new();
    let receiver_health = ReceiverHealth::new();
    let caster_metrics = CasterMetrics::new();

    let serial = tokio_serial::new(&config.receiver.port, config.receiver.baud)
        .open_native_async()
        .map_err(|source| rover_core::error::StartupError::ReceiverOpenFailed {
            port: config.receiver.port.clone(),
            source: std::io::Error::other(source),
        })?;
    let (serial_read, serial_write) = split(serial);

    tokio::spawn(run_receiver(serial_read, position_store.clone(), receiver_health.clone()));

    if !config.caster.host.is_empty() {
        let caster_config = config.caster.clone();
        let store = position_store.clone();
        let metrics = caster_metrics.clone();
        tokio::spawn(run_correction_link(caster_config, serial_write, store, metrics));
    } else {
        warn!("caster.host not set, correction link disabled");
        drop_writer(serial_write).await;
    }

    let supervisor = Arc::new(Supervisor::new(
        config.clone(),
        position_store,
        receiver_health,
        caster_metrics,
        MotorSink::Logging,
    ));

    let (sink_handle, emergency_flag) = supervisor.motor_watchdog_handles().await;
    tokio::spawn(run_watchdog(sink_handle, emergency_flag));

    if let Some(path) = &args.waypoints {
        load_waypoints(&supervisor, path, args.loop_path).await?;
    }

    supervisor.run().await;
    Ok(())
}

async fn drop_writer<W: AsyncWriteExt + Unpin>(mut w: W) {
    let _ = w.flush().await;
}

async fn load_waypoints(supervisor: &Supervisor, path: &PathBuf, loop_path: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut count = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(3, ',');
        let lat: f64 = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing lat in: {line}"))?
            .trim()
            .parse()?;
        let lon: f64 = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing lon in: {line}"))?
            .trim()
            .parse()?;
        let name = parts.next().map(|n| n.trim().to_string());
        supervisor.add_waypoint(lat, lon, name).await;
        count += 1;
    }
    if count == 0 {
        error!(path = %path.display(), "waypoints file had no usable entries");
        return Ok(());
    }
    if loop_path {
        supervisor.set_loop_mode(true).await;
    }
    info!(count, "waypoints loaded");
    supervisor.start_navigation().await;
    Ok(())
}
