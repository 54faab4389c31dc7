//! C5 — Navigator (§4.5). The core waypoint-following state machine:
//! `CALIBRATING → ALIGNING → DRIVING → REACHED`, ticked by the supervisor.
//!
//! Grounded on the teacher's `procedure_engine::ProcedureEngine`: elapsed
//! time is tracked from a phase-entry timestamp, `tick()` recomputes a
//! result every call, and a transition may "re-run" the new phase's logic
//! within the same tick rather than waiting for the next one.

use rover_types::{
    DriveCommand, NavMode, NavStatus, NavigationPhase, NavigationState, Waypoint,
};
use tracing::{info, warn};

use crate::config::NavConfig;
use crate::geo::{bearing_ll, circular_mean, circular_range, haversine_ll, normalize_signed};
use crate::parser::HEADING_RELIABLE_SPEED_MPS;
use crate::position_store::PositionStore;
use crate::waypoint_queue::WaypointQueue;

/// Proportional-only by default (§4.5.7); `ki`/`kd` are plumbed through so a
/// future tune doesn't need an API change.
#[derive(Debug, Clone, Copy)]
struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    prev_err: f64,
}

impl Pid {
    fn new(kp: f64) -> Self {
        Self {
            kp,
            ki: 0.0,
            kd: 0.0,
            integral: 0.0,
            prev_err: 0.0,
        }
    }

    fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_err = 0.0;
    }

    fn step(&mut self, err: f64, dt_s: f64) -> f64 {
        self.integral += err * dt_s;
        let deriv = if dt_s > 0.0 {
            (err - self.prev_err) / dt_s
        } else {
            0.0
        };
        self.prev_err = err;
        self.kp * err + self.ki * self.integral + self.kd * deriv
    }
}

/// Milestone distances (meters) tracked for observability only — they do
/// not affect control (§4.5.4).
const MILESTONES_M: [f64; 2] = [10.0, 5.0];

pub struct Navigator {
    config: NavConfig,
    position_store: PositionStore,
    queue: WaypointQueue,

    phase: NavigationPhase,
    phase_started_at_ms: Option<u64>,
    last_tick_at_ms: Option<u64>,

    running: bool,
    paused: bool,
    mode: NavMode,
    status: NavStatus,
    error: Option<String>,

    current_heading_deg: Option<f64>,
    calibration_samples: Vec<f64>,
    last_speed_mps: Option<f64>,
    last_distance_m: Option<f64>,
    last_bearing_deg: Option<f64>,
    milestones_remaining: Vec<f64>,

    max_speed: f64,
    pid: Pid,
}

impl Navigator {
    pub fn new(config: NavConfig, position_store: PositionStore) -> Self {
        let max_speed = config.max_speed;
        let pid = Pid::new(config.drive_correction_gain);
        Self {
            config,
            position_store,
            queue: WaypointQueue::new(),
            phase: NavigationPhase::Idle,
            phase_started_at_ms: None,
            last_tick_at_ms: None,
            running: false,
            paused: false,
            mode: NavMode::Single,
            status: NavStatus::Idle,
            error: None,
            current_heading_deg: None,
            calibration_samples: Vec::new(),
            last_speed_mps: None,
            last_distance_m: None,
            last_bearing_deg: None,
            milestones_remaining: Vec::new(),
            max_speed,
            pid,
        }
    }

    // ---- §4.5.8 public operations -----------------------------------

    pub fn set_target(&mut self, wp: Waypoint) {
        self.queue.clear();
        self.queue.add(wp);
        self.mode = NavMode::Single;
        self.start();
    }

    pub fn set_path(&mut self, wps: Vec<Waypoint>, loop_mode: bool) {
        self.queue.clear();
        for wp in wps {
            self.queue.add(wp);
        }
        self.queue.set_loop(loop_mode);
        self.mode = if loop_mode { NavMode::Loop } else { NavMode::Path };
        self.start();
    }

    pub fn add_waypoint(&mut self, wp: Waypoint, auto_start: bool) {
        self.queue.add(wp);
        if self.queue.len() > 1 && self.mode == NavMode::Single {
            self.mode = NavMode::Path;
        }
        if auto_start {
            self.start();
        }
    }

    pub fn start(&mut self) {
        self.running = true;
        self.paused = false;
        if self.error.is_some() {
            self.error = None;
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.status = NavStatus::Paused;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.phase = NavigationPhase::Idle;
        self.phase_started_at_ms = None;
        self.status = NavStatus::Idle;
        self.error = None;
        self.pid.reset();
    }

    pub fn set_loop_mode(&mut self, loop_mode: bool) {
        self.queue.set_loop(loop_mode);
        self.mode = if loop_mode {
            NavMode::Loop
        } else if self.queue.len() > 1 {
            NavMode::Path
        } else {
            NavMode::Single
        };
    }

    pub fn get_loop_count(&self) -> u64 {
        self.queue.loop_count()
    }

    pub fn set_max_speed(&mut self, speed: f64) {
        self.max_speed = speed.clamp(0.0, 1.0);
    }

    pub fn get_state(&self) -> NavigationState {
        NavigationState {
            phase: self.phase,
            target: self.queue.peek().cloned(),
            distance_m: self.last_distance_m,
            bearing_deg: self.last_bearing_deg,
            heading_deg: self.current_heading_deg,
            speed_mps: self.last_speed_mps,
            mode: self.mode,
            status: self.status,
            error: self.error.clone(),
            remaining_waypoints: self.queue.remaining(),
            loop_count: self.queue.loop_count(),
        }
    }

    pub fn queue_mut(&mut self) -> &mut WaypointQueue {
        &mut self.queue
    }

    // ---- tick ----------------------------------------------------------

    /// Run one control tick, returning the drive command to hand to the
    /// motor translator. `now_ms` is the monotonic clock (see `clock`).
    pub fn tick(&mut self, now_ms: u64) -> DriveCommand {
        let dt_s = match self.last_tick_at_ms {
            Some(prev) => (now_ms.saturating_sub(prev)) as f64 / 1000.0,
            None => self.config.period_s(),
        };
        self.last_tick_at_ms = Some(now_ms);
        self.tick_inner(now_ms, dt_s)
    }

    fn tick_inner(&mut self, now_ms: u64, dt_s: f64) -> DriveCommand {
        // 1. not running / paused.
        if !self.running || self.paused {
            return DriveCommand::zero(now_ms);
        }

        // 2. no position.
        let Some(sample) = self.position_store.latest() else {
            self.status = NavStatus::Error;
            self.error = Some("no_position".to_string());
            return DriveCommand::zero(now_ms);
        };
        self.last_speed_mps = sample.speed_mps;

        // 3. stale position.
        if self
            .position_store
            .is_stale(now_ms, self.config_stale_ms())
        {
            self.status = NavStatus::Error;
            self.error = Some("stale_gps".to_string());
            return DriveCommand::zero(now_ms);
        }

        // 4. no target.
        let Some(target) = self.queue.peek().cloned() else {
            self.phase = NavigationPhase::Idle;
            self.status = NavStatus::Idle;
            self.error = None;
            self.last_distance_m = None;
            self.last_bearing_deg = None;
            return DriveCommand::zero(now_ms);
        };
        self.error = None;

        let pos = (sample.position.lat, sample.position.lon);
        let target_ll = (target.lat, target.lon);
        self.last_distance_m = Some(haversine_ll(pos, target_ll));
        self.last_bearing_deg = Some(bearing_ll(pos, target_ll));

        // 5. heading unknown -> (re)calibrate.
        if self.current_heading_deg.is_none() && self.phase != NavigationPhase::Calibrating {
            self.enter_calibrating(now_ms);
        }
        if self.phase_started_at_ms.is_none() {
            self.phase_started_at_ms = Some(now_ms);
        }

        match self.phase {
            NavigationPhase::Idle => {
                self.enter_calibrating(now_ms);
                self.tick_calibrating(now_ms, &sample, dt_s)
            }
            NavigationPhase::Calibrating => self.tick_calibrating(now_ms, &sample, dt_s),
            NavigationPhase::Aligning => self.tick_aligning(now_ms, &target, dt_s),
            NavigationPhase::Driving => self.tick_driving(now_ms, &target, dt_s),
            NavigationPhase::Reached => self.tick_reached(now_ms),
        }
    }

    fn config_stale_ms(&self) -> u64 {
        2_000
    }

    fn enter_calibrating(&mut self, now_ms: u64) {
        self.phase = NavigationPhase::Calibrating;
        self.phase_started_at_ms = Some(now_ms);
        self.calibration_samples.clear();
        self.status = NavStatus::Navigating;
    }

    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.phase_started_at_ms.unwrap_or(now_ms))
    }

    // ---- §4.5.2 CALIBRATING ---------------------------------------

    fn tick_calibrating(
        &mut self,
        now_ms: u64,
        sample: &rover_types::KinematicSample,
        dt_s: f64,
    ) -> DriveCommand {
        if let (Some(course), Some(speed)) = (sample.course_deg, sample.speed_mps) {
            if speed >= HEADING_RELIABLE_SPEED_MPS {
                self.calibration_samples.push(course);
            }
        }

        if self.calibration_samples.len() >= 3
            && circular_range(&self.calibration_samples) < 15.0
        {
            self.current_heading_deg = circular_mean(&self.calibration_samples);
            info!(
                heading = self.current_heading_deg,
                "calibration accepted, entering ALIGNING"
            );
            self.enter_aligning(now_ms);
            let target = self.queue.peek().cloned().expect("target present");
            return self.tick_aligning(now_ms, &target, dt_s);
        }

        let elapsed = self.elapsed_ms(now_ms);
        if elapsed as f64 >= self.config.calibration_duration_s * 1_000.0 {
            if let Some(&last) = self.calibration_samples.last() {
                self.current_heading_deg = Some(last);
                warn!(heading = last, "calibration timed out, accepting last sample");
                self.enter_aligning(now_ms);
                let target = self.queue.peek().cloned().expect("target present");
                return self.tick_aligning(now_ms, &target, dt_s);
            } else {
                warn!("calibration timed out with no samples, falling back to DRIVING at reduced speed");
                self.phase = NavigationPhase::Driving;
                self.phase_started_at_ms = Some(now_ms);
                self.pid.reset();
                self.status = NavStatus::Navigating;
                return DriveCommand {
                    speed: 0.5,
                    turn_rate: 0.0,
                    generated_at_ms: now_ms,
                    priority: 0,
                };
            }
        }

        DriveCommand {
            speed: 0.5,
            turn_rate: 0.0,
            generated_at_ms: now_ms,
            priority: 0,
        }
    }

    fn enter_aligning(&mut self, now_ms: u64) {
        self.pid.reset();
        self.phase = NavigationPhase::Aligning;
        self.phase_started_at_ms = Some(now_ms);
        self.status = NavStatus::Navigating;
        self.milestones_remaining = MILESTONES_M.to_vec();
    }

    // ---- §4.5.3 ALIGNING --------------------------------------------

    fn tick_aligning(&mut self, now_ms: u64, target: &Waypoint, _dt_s: f64) -> DriveCommand {
        let heading = match self.current_heading_deg {
            Some(h) => h,
            None => {
                // Shouldn't happen — preflight step 5 guarantees calibration
                // runs first — but never fabricate a heading.
                return DriveCommand {
                    speed: 0.5,
                    turn_rate: 0.0,
                    generated_at_ms: now_ms,
                    priority: 0,
                };
            }
        };
        let bearing = self.last_bearing_deg.unwrap_or_else(|| {
            bearing_ll(
                (0.0, 0.0),
                (target.lat, target.lon),
            )
        });
        let err = normalize_signed(bearing - heading);

        if err.abs() < self.config.align_tolerance_deg {
            self.pid.reset();
            self.phase = NavigationPhase::Driving;
            self.phase_started_at_ms = Some(now_ms);
            self.status = NavStatus::Navigating;
            return DriveCommand {
                speed: self.max_speed,
                turn_rate: 0.0,
                generated_at_ms: now_ms,
                priority: 0,
            };
        }

        if self.elapsed_ms(now_ms) as f64 > self.config.align_timeout_s * 1_000.0 {
            warn!("align timeout, falling back to DRIVING at reduced speed");
            self.phase = NavigationPhase::Driving;
            self.phase_started_at_ms = Some(now_ms);
            self.pid.reset();
            self.status = NavStatus::Navigating;
            return DriveCommand {
                speed: 0.5,
                turn_rate: 0.0,
                generated_at_ms: now_ms,
                priority: 0,
            };
        }

        let turn = err.signum() * (err.abs() / 90.0).min(1.0) * self.config.align_speed;
        DriveCommand {
            speed: 0.0,
            turn_rate: turn,
            generated_at_ms: now_ms,
            priority: 0,
        }
    }

    // ---- §4.5.4 DRIVING ------------------------------------------------

    fn tick_driving(&mut self, now_ms: u64, target: &Waypoint, dt_s: f64) -> DriveCommand {
        let distance = self.last_distance_m.unwrap_or(f64::MAX);

        if distance <= target.tolerance_m {
            self.phase = NavigationPhase::Reached;
            self.phase_started_at_ms = Some(now_ms);
            self.status = NavStatus::ReachedWaypoint;
            return DriveCommand::zero(now_ms);
        }

        self.milestones_remaining
            .retain(|&m| {
                if distance <= m {
                    info!(distance, milestone = m, "waypoint milestone");
                    false
                } else {
                    true
                }
            });

        let Some(heading) = self.current_heading_deg else {
            warn!("heading unknown mid-drive, fallback (0.5, 0)");
            return DriveCommand {
                speed: 0.5,
                turn_rate: 0.0,
                generated_at_ms: now_ms,
                priority: 0,
            };
        };

        let bearing = self.last_bearing_deg.unwrap_or(heading);
        let err = normalize_signed(bearing - heading);

        if err.abs() > self.config.realign_threshold_deg {
            self.pid.reset();
            self.phase = NavigationPhase::Aligning;
            self.phase_started_at_ms = Some(now_ms);
            return self.tick_aligning(now_ms, target, dt_s);
        }

        let turn = self.pid.step(err, dt_s).clamp(-0.2, 0.2);
        DriveCommand {
            speed: self.max_speed,
            turn_rate: turn,
            generated_at_ms: now_ms,
            priority: 0,
        }
    }

    // ---- §4.5.5 REACHED -------------------------------------------------

    fn tick_reached(&mut self, now_ms: u64) -> DriveCommand {
        if self.mode == NavMode::Single {
            self.queue.clear();
            self.phase = NavigationPhase::Idle;
            self.status = NavStatus::Idle;
            return DriveCommand::zero(now_ms);
        }

        if self.queue.advance() {
            self.phase = NavigationPhase::Aligning;
            self.phase_started_at_ms = Some(now_ms);
            self.status = NavStatus::Navigating;
            self.pid.reset();
        } else {
            self.phase = NavigationPhase::Idle;
            self.status = NavStatus::PathComplete;
        }
        DriveCommand::zero(now_ms)
    }
}

impl NavConfig {
    fn period_s(&self) -> f64 {
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::{FixQuality, GeodeticPosition, KinematicSample};

    fn config() -> NavConfig {
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

    #[test]
    fn no_position_yields_error_and_zero_command() {
        let store = PositionStore::new();
        let mut nav = Navigator::new(config(), store);
        nav.set_target(Waypoint::new(52.0, 21.0));
        let cmd = nav.tick(0);
        assert_eq!(cmd.speed, 0.0);
        assert_eq!(nav.get_state().status, NavStatus::Error);
        assert_eq!(nav.get_state().error.as_deref(), Some("no_position"));
    }

    #[test]
    fn stale_position_yields_error() {
        let store = PositionStore::new();
        publish(&store, 52.0, 21.0, Some(90.0), Some(1.0), 0);
        let mut nav = Navigator::new(config(), store);
        nav.set_target(Waypoint::new(52.0001, 21.0));
        let cmd = nav.tick(5_000);
        assert_eq!(cmd.speed, 0.0);
        assert_eq!(nav.get_state().status, NavStatus::Error);
        assert_eq!(nav.get_state().error.as_deref(), Some("stale_gps"));
    }

    #[test]
    fn no_target_is_idle() {
        let store = PositionStore::new();
        publish(&store, 52.0, 21.0, Some(90.0), Some(1.0), 0);
        let mut nav = Navigator::new(config(), store);
        nav.start();
        let cmd = nav.tick(0);
        assert_eq!(cmd.speed, 0.0);
        assert_eq!(nav.get_state().phase, NavigationPhase::Idle);
    }

    #[test]
    fn calibration_then_alignment_then_driving_reaches_target() {
        let store = PositionStore::new();
        let mut nav = Navigator::new(config(), store.clone());
        // target due east (~27m), matches spec S1.
        nav.set_target(Waypoint::new(52.237049, 21.017932).with_tolerance(0.5));

        let mut t = 0u64;
        // Feed a stable easterly course/speed for calibration.
        for _ in 0..4 {
            publish(&store, 52.237049, 21.017532, Some(90.0), Some(0.7), t);
            nav.tick(t);
            t += 500;
        }
        assert!(nav.get_state().heading_deg.is_some());

        // Keep feeding position/heading, moving steadily toward the target
        // each tick (simulating the rover actually driving east).
        let start_lon = 21.017532;
        let target_lon = 21.017932;
        for i in 0..80 {
            let frac = (i + 1) as f64 / 80.0;
            let lon = start_lon + (target_lon - start_lon) * frac;
            publish(&store, 52.237049, lon, Some(90.0), Some(0.7), t);
            let cmd = nav.tick(t);
            assert!((-1.0..=1.0).contains(&cmd.speed));
            assert!((-1.0..=1.0).contains(&cmd.turn_rate));
            t += 500;
            if nav.get_state().status == NavStatus::Idle {
                break;
            }
        }
        assert_eq!(nav.get_state().status, NavStatus::Idle);
        assert_eq!(nav.get_state().phase, NavigationPhase::Idle);
    }

    #[test]
    fn loop_mode_cycles_and_counts() {
        let store = PositionStore::new();
        let mut nav = Navigator::new(config(), store.clone());
        let wps = vec![
            Waypoint::new(52.2370, 21.0175).with_tolerance(5.0),
            Waypoint::new(52.2371, 21.0175).with_tolerance(5.0),
        ];
        nav.set_path(wps, true);

        let mut t = 0u64;
        for _ in 0..4 {
            publish(&store, 52.2370, 21.0175, Some(0.0), Some(0.7), t);
            nav.tick(t);
            t += 500;
        }

        for _ in 0..400 {
            let (lat, lon) = {
                let target = nav.get_state().target;
                match target {
                    Some(w) => (w.lat, w.lon),
                    None => (52.2370, 21.0175),
                }
            };
            publish(&store, lat, lon, Some(0.0), Some(0.7), t);
            nav.tick(t);
            t += 500;
            if nav.get_loop_count() >= 1 {
                break;
            }
        }
        assert!(nav.get_loop_count() >= 1);
    }
}
