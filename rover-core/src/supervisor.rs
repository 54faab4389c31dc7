//! C7 — Rover Supervisor (§4.7). Owns the fixed-cadence control tick,
//! stitches the navigator to the motor translator, enforces the
//! three-strike error budget, and exposes the transport-agnostic API of
//! §6.4.
//!
//! Tick-loop shape grounded on the teacher's `auto_director::start_auto_director`
//! (`tokio::time::interval` + `.tick().await` loop).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use rover_types::{KinematicSample, NavigationState, SystemStatus, Waypoint};
use tokio::sync::Mutex;
use tracing::warn;

use crate::clock;
use crate::config::RoverConfig;
use crate::correction_link::CasterMetrics;
use crate::motor::{EmergencyFlag, MotorController, MotorSink};
use crate::navigator::Navigator;
use crate::position_store::PositionStore;
use crate::receiver::ReceiverHealth;

/// Three consecutive `ERROR`-status ticks pause the navigator until an
/// explicit `resume` (§4.7 "Error budget").
const ERROR_BUDGET_STRIKES: u32 = 3;

pub struct Supervisor {
    navigator: Mutex<Navigator>,
    motor: Mutex<MotorController>,
    position_store: PositionStore,
    receiver_health: ReceiverHealth,
    caster_metrics: CasterMetrics,
    tick_period: Duration,
    consecutive_errors: AtomicU32,
    paused_by_error_budget: AtomicBool,
}

impl Supervisor {
    pub fn new(
        config: RoverConfig,
        position_store: PositionStore,
        receiver_health: ReceiverHealth,
        caster_metrics: CasterMetrics,
        motor_sink: MotorSink,
    ) -> Self {
        let max_speed = config.nav.max_speed;
        let navigator = Navigator::new(config.nav.clone(), position_store.clone());
        let motor = MotorController::new(config.motor.clone(), max_speed, motor_sink);
        Self {
            navigator: Mutex::new(navigator),
            motor: Mutex::new(motor),
            position_store,
            receiver_health,
            caster_metrics,
            tick_period: Duration::from_millis(config.tick.period_ms),
            consecutive_errors: AtomicU32::new(0),
            paused_by_error_budget: AtomicBool::new(false),
        }
    }

    /// Handles to wire the motor watchdog execution context (§5) — spawn
    /// `motor::run_watchdog(sink, flag)` with these in `rover-supervisor`'s
    /// `main`.
    pub async fn motor_watchdog_handles(&self) -> (std::sync::Arc<Mutex<MotorSink>>, EmergencyFlag) {
        let motor = self.motor.lock().await;
        (motor.sink_handle(), motor.emergency_flag())
    }

    /// Runs the control tick forever. Intended as its own execution
    /// context (§5 "supervisor tick").
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick_period);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let now_ms = clock::now_ms();
        let cmd = {
            let mut nav = self.navigator.lock().await;
            nav.tick(now_ms)
        };
        {
            let mut motor = self.motor.lock().await;
            motor.tick(cmd, now_ms).await;
        }
        self.update_error_budget().await;
    }

    async fn update_error_budget(&self) {
        let is_error = {
            let nav = self.navigator.lock().await;
            nav.get_state().status == rover_types::NavStatus::Error
        };
        if is_error {
            let strikes = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
            if strikes >= ERROR_BUDGET_STRIKES && !self.paused_by_error_budget.load(Ordering::SeqCst)
            {
                warn!(strikes, "error budget exhausted, pausing navigator");
                self.navigator.lock().await.pause();
                self.paused_by_error_budget.store(true, Ordering::SeqCst);
            }
        } else {
            self.consecutive_errors.store(0, Ordering::SeqCst);
        }
    }

    // ---- §6.4 external API surface -------------------------------------

    pub fn get_position(&self) -> Option<KinematicSample> {
        self.position_store.latest()
    }

    pub async fn get_navigation_status(&self) -> NavigationState {
        self.navigator.lock().await.get_state()
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let sample = self.position_store.latest();
        let now_ms = clock::now_ms();
        let gps_connected = sample
            .as_ref()
            .map(|s| now_ms.saturating_sub(s.position.received_at_ms) < crate::position_store::DEFAULT_STALE_MS)
            .unwrap_or(false)
            && !self.receiver_health.is_stalled();
        let nav = self.navigator.lock().await.get_state();
        SystemStatus {
            gps_connected,
            ntrip_connected: self.caster_metrics.is_streaming(),
            fix_quality: sample.map(|s| s.position.fix_quality).unwrap_or_default(),
            satellites: sample_satellites(&self.position_store),
            hdop: self.position_store.latest().and_then(|s| s.position.hdop),
            mode: nav.mode,
        }
    }

    pub async fn add_waypoint(&self, lat: f64, lon: f64, name: Option<String>) -> usize {
        let mut wp = Waypoint::new(lat, lon);
        if let Some(name) = name {
            wp = wp.with_name(name);
        }
        let mut nav = self.navigator.lock().await;
        nav.add_waypoint(wp, false);
        nav.get_state().remaining_waypoints
    }

    pub async fn clear_waypoints(&self) {
        let mut nav = self.navigator.lock().await;
        nav.queue_mut().clear();
    }

    pub async fn start_navigation(&self) {
        self.navigator.lock().await.start();
    }

    pub async fn set_loop_mode(&self, loop_mode: bool) {
        self.navigator.lock().await.set_loop_mode(loop_mode);
    }

    pub async fn goto(&self, lat: f64, lon: f64, name: Option<String>) {
        let mut wp = Waypoint::new(lat, lon);
        if let Some(name) = name {
            wp = wp.with_name(name);
        }
        self.navigator.lock().await.set_target(wp);
    }

    pub async fn pause(&self) {
        self.navigator.lock().await.pause();
    }

    pub async fn resume(&self) {
        self.navigator.lock().await.resume();
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.paused_by_error_budget.store(false, Ordering::SeqCst);
    }

    pub async fn cancel(&self) {
        self.navigator.lock().await.stop();
    }

    pub async fn emergency_stop(&self) {
        self.motor.lock().await.emergency_flag().trigger();
    }

    pub async fn clear_emergency(&self) {
        self.motor.lock().await.emergency_flag().clear();
    }

    pub async fn set_speed(&self, speed: f64) {
        let speed = speed.clamp(0.0, 1.0);
        self.navigator.lock().await.set_max_speed(speed);
        self.motor.lock().await.set_max_speed(speed);
    }
}

fn sample_satellites(store: &PositionStore) -> u32 {
    store.latest().map(|s| s.position.satellites).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoverConfig;

    fn supervisor() -> Supervisor {
        Supervisor::new(
            RoverConfig::default(),
            PositionStore::new(),
            ReceiverHealth::new(),
            CasterMetrics::new(),
            MotorSink::Logging,
        )
    }

    #[tokio::test]
    async fn add_then_clear_waypoints_is_idle() {
        let sup = supervisor();
        sup.add_waypoint(52.0, 21.0, None).await;
        sup.clear_waypoints().await;
        let state = sup.get_navigation_status().await;
        assert!(state.target.is_none());
    }

    #[tokio::test]
    async fn error_budget_pauses_after_three_strikes() {
        let sup = supervisor();
        sup.goto(52.0, 21.0, None).await;
        // No position published -> every tick is ERROR("no_position").
        for _ in 0..3 {
            sup.tick().await;
        }
        let state = sup.get_navigation_status().await;
        assert_eq!(state.status, rover_types::NavStatus::Paused);
    }

    #[tokio::test]
    async fn emergency_stop_is_reflected_immediately() {
        let sup = supervisor();
        sup.emergency_stop().await;
        assert!(sup.motor.lock().await.emergency_flag().is_set());
        sup.clear_emergency().await;
        assert!(!sup.motor.lock().await.emergency_flag().is_set());
    }
}
