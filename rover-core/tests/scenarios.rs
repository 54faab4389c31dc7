//! Black-box replays of the end-to-end scenarios in spec §8 (S1-S6) that
//! the unit tests beside `navigator.rs` don't already cover: S1 (happy
//! path) and S4 (loop patrol) live there since they only exercise the
//! navigator in isolation. These drive the navigator together with the
//! motor translator, tick by tick, the way the supervisor does.

use rover_core::config::{MotorConfig, NavConfig};
use rover_core::motor::MotorController;
use rover_core::navigator::Navigator;
use rover_core::position_store::PositionStore;
use rover_types::{FixQuality, GeodeticPosition, KinematicSample, NavStatus, Waypoint};

const TICK_MS: u64 = 500;

fn nav_config() -> NavConfig {
    NavConfig {
        max_speed: 1.0,
        align_tolerance_deg: 15.0,
        realign_threshold_deg: 30.0,
        waypoint_tolerance_m: 0.5,
        align_speed: 0.4,
        align_timeout_s: 10.0,
        calibration_duration_s: 5.0,
        drive_correction_gain: 0.02,
        loop_mode: false,
    }
}

fn motor_config() -> MotorConfig {
    MotorConfig {
        ramp_rate: 0.5,
        turn_sensitivity: 1.0,
        safety_timeout_s: 0.5,
    }
}

fn publish(store: &PositionStore, lat: f64, lon: f64, course: Option<f64>, speed: Option<f64>, at_ms: u64) {
    store.publish(KinematicSample {
        position: GeodeticPosition {
            lat,
            lon,
            alt_m: None,
            fix_quality: FixQuality::RtkFixed,
            satellites: 12,
            hdop: Some(0.8),
            received_at_ms: at_ms,
        },
        course_deg: course,
        speed_mps: speed,
    });
}

/// S2 — stale GPS mid-run: withholding position updates drives the
/// navigator to `ERROR("stale_gps")` and a zero drive command; resuming
/// samples brings it back to `DRIVING` without losing the target.
#[tokio::test]
async fn s2_stale_gps_mid_run_recovers_without_losing_target() {
    let store = PositionStore::new();
    let mut nav = Navigator::new(nav_config(), store.clone());
    let mut motor = MotorController::new(motor_config(), 1.0, rover_core::motor::MotorSink::Logging);

    nav.set_target(Waypoint::new(52.237049, 21.017932).with_tolerance(0.5));

    let mut t = 0u64;
    for _ in 0..4 {
        publish(&store, 52.237049, 21.017532, Some(90.0), Some(0.7), t);
        let cmd = nav.tick(t);
        motor.tick(cmd, t).await;
        t += TICK_MS;
    }
    assert_eq!(nav.get_state().phase, rover_types::NavigationPhase::Driving);
    let target_before = nav.get_state().target.clone();

    // Withhold updates for 3s (6 ticks at 500ms) starting now. The first
    // tick or two may still read a position under the 2s staleness bound;
    // once `is_stale` trips, the command is pinned at zero.
    for _ in 0..6 {
        let cmd = nav.tick(t);
        motor.tick(cmd, t).await;
        t += TICK_MS;
    }
    let state = nav.get_state();
    assert_eq!(state.status, NavStatus::Error);
    assert_eq!(state.error.as_deref(), Some("stale_gps"));
    let cmd = nav.tick(t);
    assert_eq!(cmd.speed, 0.0);
    assert_eq!(cmd.turn_rate, 0.0);
    motor.tick(cmd, t).await;
    t += TICK_MS;

    // Motor output should have ramped down to zero by now.
    let wheels = motor.tick(rover_types::DriveCommand::zero(t), t).await;
    assert_eq!(wheels, rover_types::WheelCommand::ZERO);

    // Fresh samples resume driving toward the same target.
    publish(&store, 52.237049, 21.017532, Some(90.0), Some(0.7), t);
    let cmd = nav.tick(t);
    assert!(cmd.speed > 0.0 || nav.get_state().phase == rover_types::NavigationPhase::Aligning);
    assert_eq!(nav.get_state().target, target_before);
}

/// S3 — a perturbation implying a large heading error forces
/// `DRIVING -> ALIGNING`, and the navigator returns to `DRIVING` once the
/// error is back under tolerance.
#[tokio::test]
async fn s3_large_bearing_error_forces_realign_then_resumes_driving() {
    let store = PositionStore::new();
    let mut nav = Navigator::new(nav_config(), store.clone());
    nav.set_target(Waypoint::new(52.237049, 21.017932).with_tolerance(0.5));

    let mut t = 0u64;
    for _ in 0..4 {
        publish(&store, 52.237049, 21.017532, Some(90.0), Some(0.7), t);
        nav.tick(t);
        t += TICK_MS;
    }
    assert_eq!(nav.get_state().phase, rover_types::NavigationPhase::Driving);

    // Target is due east; a position south of the original track implies a
    // bearing well off the current (east) heading -> forces a re-align.
    publish(&store, 52.236049, 21.017532, Some(90.0), Some(0.7), t);
    let cmd = nav.tick(t);
    assert_eq!(cmd.speed, 0.0, "re-aligning drives speed to zero while rotating");
    assert_eq!(nav.get_state().phase, rover_types::NavigationPhase::Aligning);
    t += TICK_MS;

    // Hold the same position/heading: bearing error shrinks toward the
    // fixed target as ALIGNING keeps recomputing it against current_heading,
    // and the phase eventually returns to DRIVING (bounded by align_timeout).
    let mut saw_driving_again = false;
    for _ in 0..25 {
        publish(&store, 52.236049, 21.017532, Some(90.0), Some(0.7), t);
        nav.tick(t);
        t += TICK_MS;
        if nav.get_state().phase == rover_types::NavigationPhase::Driving {
            saw_driving_again = true;
            break;
        }
    }
    assert!(saw_driving_again, "expected ALIGNING -> DRIVING within the timeout window");
}

/// S5 — emergency stop while driving: motor output is forced to zero on
/// the very next tick and stays zero until `clear_emergency` equivalent
/// (clearing the `EmergencyFlag`).
#[tokio::test]
async fn s5_emergency_stop_zeros_output_and_blocks_further_commands() {
    let mut motor = MotorController::new(motor_config(), 1.0, rover_core::motor::MotorSink::Logging);
    let driving = rover_types::DriveCommand {
        speed: 0.8,
        turn_rate: 0.0,
        generated_at_ms: 0,
        priority: 0,
    };
    let out = motor.tick(driving, 0).await;
    assert!(out.left > 0.0 && out.right > 0.0);

    motor.emergency_flag().trigger();
    let out = motor.tick(driving, 100).await;
    assert_eq!(out, rover_types::WheelCommand::ZERO);

    // Further drive commands are ignored while the flag remains set.
    let out = motor.tick(driving, 200).await;
    assert_eq!(out, rover_types::WheelCommand::ZERO);

    motor.emergency_flag().clear();
    let out = motor.tick(driving, 300).await;
    assert!(out.left > 0.0 || out.right > 0.0, "motor resumes once cleared");
}

/// S6 — calibration times out with only two heading samples collected;
/// the navigator accepts the last sample as `current_heading` and moves
/// to `ALIGNING` rather than waiting indefinitely for a third.
#[tokio::test]
async fn s6_calibration_timeout_accepts_last_partial_sample() {
    let store = PositionStore::new();
    let mut nav = Navigator::new(nav_config(), store.clone());
    nav.set_target(Waypoint::new(52.237049, 21.017932).with_tolerance(0.5));

    let mut t = 0u64;
    // Two heading samples, 90 deg then 92 deg, then the stream keeps
    // publishing position but with heading no longer reliable (slow speed).
    publish(&store, 52.237049, 21.017532, Some(90.0), Some(0.7), t);
    nav.tick(t);
    t += 2_000;
    publish(&store, 52.237049, 21.017532, Some(92.0), Some(0.7), t);
    nav.tick(t);
    t += 2_000;

    // No further reliable heading; keep feeding position until the 5s
    // calibration timeout elapses.
    while t <= 5_100 {
        publish(&store, 52.237049, 21.017532, None, Some(0.1), t);
        nav.tick(t);
        t += TICK_MS;
    }

    let state = nav.get_state();
    assert!(state.heading_deg.is_some());
    let heading = state.heading_deg.unwrap();
    // §4.5.2's prose says the timeout path accepts the *last* sample
    // (92 deg here), which is what this implementation does; spec.md §8's
    // own worked S6 scenario instead states the expected result as the
    // circular mean of the two samples (~91 deg). That's a direct
    // contradiction between the spec's component design and its own
    // example, resolved here in favor of the literal §4.5.2 text — see the
    // "fifth ambiguity" entry in SPEC_FULL.md §12 / DESIGN.md.
    assert!((heading - 92.0).abs() < 1e-6, "expects the last sample (92 deg) per §4.5.2, got {heading}");
    // Accepting calibration re-runs the tick in ALIGNING, which may itself
    // immediately clear tolerance and fall through to DRIVING in the same
    // tick (§4.5.2's "transition to ALIGNING (re-run the tick)").
    assert!(matches!(
        state.phase,
        rover_types::NavigationPhase::Aligning | rover_types::NavigationPhase::Driving
    ));
}

/// Companion test for the receiver's coalescing fix: two position
/// sentences with no intervening velocity sentence must each reach the
/// position store — the first is flushed (course/speed absent) before the
/// second becomes pending, rather than being silently replaced (§4.1 "at
/// least once per accepted position sentence").
#[tokio::test]
async fn receiver_flushes_first_gga_before_a_back_to_back_second() {
    use rover_core::receiver::{run_receiver, ReceiverHealth};

    fn checksum_line(body: &str) -> String {
        let cs = body.bytes().fold(0u8, |c, b| c ^ b);
        format!("${body}*{cs:02X}\r\n")
    }

    let gga1 = checksum_line("GNGGA,123519,5214.2229,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,");
    let gga2 = checksum_line("GNGGA,123520,5215.0000,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,");
    let script = format!("{gga1}{gga2}");
    let reader = std::io::Cursor::new(script.into_bytes());

    let store = PositionStore::new();
    let health = ReceiverHealth::new();
    let handle = tokio::spawn(run_receiver(reader, store.clone(), health));

    // Inside the 200ms coalescing window: only the flush triggered by the
    // second GGA's arrival can have published by now.
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    handle.abort();

    let sample = store.latest().expect("first GGA was flushed, not dropped");
    assert!((sample.position.lat - 52.237048).abs() < 1e-3);
}
