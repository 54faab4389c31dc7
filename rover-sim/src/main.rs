//! rover-sim — a software rover + GNSS + caster simulator. Runs the real
//! `rover-core` supervisor/navigator/motor stack in a closed loop against
//! simulated physics and NMEA sentences, so the S1-S6 scenarios can be
//! replayed without hardware.
//!
//! Modeled on the teacher's `uwb-simulator` package: a CLI-selected
//! scenario drives a `tokio::time::interval` physics loop that feeds the
//! rest of the stack exactly the way real hardware would.

mod nmea_encode;
mod physics;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rover_core::config::RoverConfig;
use rover_core::correction_link::CasterMetrics;
use rover_core::motor::{run_watchdog, MotorSink};
use rover_core::position_store::PositionStore;
use rover_core::receiver::ReceiverHealth;
use rover_core::Supervisor;
use rover_core::parser::{NmeaParser, SentenceEvent};
use rover_types::{FixQuality, GeodeticPosition, KinematicSample, NavStatus, Waypoint};
use tokio::sync::mpsc;
use tracing::info;

use physics::GroundTruth;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Scenario {
    /// S1 — single waypoint, straight run.
    Happy,
    /// S2 — GPS goes stale mid-run, then resumes.
    StaleGps,
    /// S3 — a perturbation forces a re-align mid-drive.
    Realign,
    /// S4 — a four-corner loop path.
    Loop,
    /// S5 — emergency stop while driving.
    Emergency,
    /// S6 — calibration times out with only two heading samples.
    CalibrationTimeout,
}

#[derive(Parser, Debug)]
#[command(name = "rover-sim", about = "RTK rover closed-loop simulator")]
struct Args {
    #[arg(value_enum)]
    scenario: Scenario,
    /// Config file path (TOML); falls back to spec defaults.
    #[arg(short, long)]
    config: Option<String>,
    /// Simulated GNSS position noise, meters (0 disables jitter).
    #[arg(long, default_value = "0.0")]
    noise_m: f64,
    /// Hard stop after this many simulated seconds.
    #[arg(long, default_value = "120")]
    max_seconds: u64,
}

const PHYSICS_PERIOD_MS: u64 = 100;
const START: (f64, f64) = (52.237049, 21.017532);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rover_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            RoverConfig::from_toml_str(&text).map_err(|e| anyhow::anyhow!("{e}"))?
        }
        None => RoverConfig::default(),
    };
    config.validate()?;

    let position_store = PositionStore::new();
    let (wheel_tx, mut wheel_rx) = mpsc::unbounded_channel();
    let supervisor = Arc::new(Supervisor::new(
        config.clone(),
        position_store.clone(),
        ReceiverHealth::new(),
        CasterMetrics::new(),
        MotorSink::Channel(wheel_tx),
    ));

    let (sink_handle, emergency_flag) = supervisor.motor_watchdog_handles().await;
    tokio::spawn(run_watchdog(sink_handle, emergency_flag.clone()));

    let sup_run = supervisor.clone();
    tokio::spawn(async move {
        sup_run.run().await;
    });

    let mut pose = GroundTruth::new(START.0, START.1, 90.0);
    let mut rng = StdRng::seed_from_u64(1);
    let mut parser = NmeaParser::default();
    let mut last_wheel = rover_types::WheelCommand::ZERO;

    match args.scenario {
        Scenario::Happy | Scenario::StaleGps | Scenario::Realign | Scenario::CalibrationTimeout => {
            supervisor
                .goto(START.0, START.1 + 0.00036, Some("east-27m".into()))
                .await;
        }
        Scenario::Emergency => {
            supervisor
                .goto(START.0, START.1 + 0.0010, Some("far-east".into()))
                .await;
        }
        Scenario::Loop => {
            supervisor.set_loop_mode(true).await;
            for wp in square_path(START.0, START.1, 20.0) {
                supervisor.add_waypoint(wp.lat, wp.lon, wp.name.clone()).await;
            }
            supervisor.start_navigation().await;
        }
    }

    let mut interval = tokio::time::interval(Duration::from_millis(PHYSICS_PERIOD_MS));
    let max_ticks = args.max_seconds * 1000 / PHYSICS_PERIOD_MS;
    let mut gps_withheld = false;

    for tick in 0..max_ticks {
        interval.tick().await;
        let elapsed_s = tick as f64 * (PHYSICS_PERIOD_MS as f64 / 1000.0);

        while let Ok(cmd) = wheel_rx.try_recv() {
            last_wheel = cmd;
        }
        pose.step(last_wheel, PHYSICS_PERIOD_MS as f64 / 1000.0);

        match args.scenario {
            Scenario::StaleGps => {
                // Withhold position updates for 3s starting at t=10s (S2).
                gps_withheld = (10.0..13.0).contains(&elapsed_s);
            }
            Scenario::Realign if (15.0..15.1).contains(&elapsed_s) => {
                info!("injecting 45 degree heading perturbation");
                pose.heading_deg = (pose.heading_deg + 45.0).rem_euclid(360.0);
            }
            Scenario::Emergency if (8.0..8.1).contains(&elapsed_s) => {
                info!("triggering emergency stop");
                supervisor.emergency_stop().await;
            }
            _ => {}
        }

        if !gps_withheld {
            publish_observed(&pose, &mut parser, &position_store, &mut rng, args.noise_m);
        }

        if tick % 10 == 0 {
            let state = supervisor.get_navigation_status().await;
            info!(
                t = format!("{elapsed_s:.1}s"),
                phase = ?state.phase,
                status = ?state.status,
                distance_m = ?state.distance_m,
                heading_deg = ?state.heading_deg,
                "sim tick"
            );
            if matches!(args.scenario, Scenario::Happy | Scenario::Realign | Scenario::CalibrationTimeout)
                && state.status == NavStatus::Idle
                && tick > 0
            {
                info!("target reached, scenario complete");
                break;
            }
            if matches!(args.scenario, Scenario::Loop) && state.loop_count >= 2 {
                info!(loop_count = state.loop_count, "two loops completed, scenario complete");
                break;
            }
        }
    }

    let final_state = supervisor.get_navigation_status().await;
    info!(status = ?final_state.status, phase = ?final_state.phase, "simulation finished");
    Ok(())
}

fn publish_observed(
    pose: &GroundTruth,
    parser: &mut NmeaParser,
    store: &PositionStore,
    rng: &mut StdRng,
    noise_m: f64,
) {
    let observed = pose.observed(noise_m, rng);
    let gga = nmea_encode::gga_sentence(&observed, FixQuality::RtkFixed, 14, 0.8);
    let vtg = nmea_encode::vtg_sentence(&observed);

    let mut position = None;
    let mut velocity = None;
    if let Ok(SentenceEvent::Position(fields)) = parser.accept_line(&gga) {
        position = Some(fields);
    }
    if let Ok(SentenceEvent::Velocity(fields)) = parser.accept_line(&vtg) {
        velocity = Some(fields);
    }

    if let Some(p) = position {
        let sample = KinematicSample {
            position: GeodeticPosition {
                lat: p.lat,
                lon: p.lon,
                alt_m: p.alt_m,
                fix_quality: p.fix_quality,
                satellites: p.satellites,
                hdop: p.hdop,
                received_at_ms: rover_core::clock::now_ms(),
            },
            course_deg: velocity.and_then(|v| v.course_deg),
            speed_mps: velocity.map(|v| v.speed_mps),
        };
        store.publish(sample);
    }
}

fn square_path(lat: f64, lon: f64, side_m: f64) -> Vec<Waypoint> {
    let deg_lat = side_m / 111_320.0;
    let deg_lon = side_m / (111_320.0 * lat.to_radians().cos());
    vec![
        Waypoint::new(lat, lon + deg_lon).with_name("A"),
        Waypoint::new(lat + deg_lat, lon + deg_lon).with_name("B"),
        Waypoint::new(lat + deg_lat, lon).with_name("C"),
        Waypoint::new(lat, lon).with_name("D"),
    ]
}
