//! C6 — Motor Translator (§4.6). Converts a normalized `(speed, turn_rate)`
//! drive command into ramp-limited per-side wheel commands, plus the
//! emergency-stop watchdog (§5 "motor watchdog" execution context).
//!
//! The motor output sink is modeled as a sum type rather than a trait
//! object (§9 "Dynamic dispatch → enum variants"): `Logging` stands in for
//! a real hardware backend (GPIO/PWM internals are out of scope, §1),
//! `Channel` is used by the simulator to observe commanded wheel values.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rover_types::{DriveCommand, WheelCommand};
use tokio::sync::{mpsc, Mutex};
use tracing::{trace, warn};

use crate::config::MotorConfig;

/// Lock-free, cloneable handle onto the emergency-stop event (§5 "shared
/// emergency flag").
#[derive(Clone, Default)]
pub struct EmergencyFlag(Arc<AtomicBool>);

impl EmergencyFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub enum MotorSink {
    /// Stand-in for the real hardware backend — traces the commanded
    /// values at the point a GPIO/PWM driver would consume them.
    Logging,
    /// Forwards commands to a channel; used by `rover-sim`.
    Channel(mpsc::UnboundedSender<WheelCommand>),
}

impl MotorSink {
    pub fn apply_wheels(&mut self, cmd: WheelCommand) {
        match self {
            MotorSink::Logging => trace!(left = cmd.left, right = cmd.right, "apply_wheels"),
            MotorSink::Channel(tx) => {
                let _ = tx.send(cmd);
            }
        }
    }

    pub fn apply_emergency_stop(&mut self) {
        match self {
            MotorSink::Logging => warn!("apply_emergency_stop"),
            MotorSink::Channel(tx) => {
                let _ = tx.send(WheelCommand::ZERO);
            }
        }
    }
}

/// Converts drive commands to wheel commands (§4.6, steps 1-4) and applies
/// them to a shared `MotorSink` (step 5).
pub struct MotorController {
    config: MotorConfig,
    max_speed: f64,
    prev: WheelCommand,
    emergency: EmergencyFlag,
    sink: Arc<Mutex<MotorSink>>,
}

impl MotorController {
    pub fn new(config: MotorConfig, max_speed: f64, sink: MotorSink) -> Self {
        Self {
            config,
            max_speed,
            prev: WheelCommand::ZERO,
            emergency: EmergencyFlag::new(),
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    pub fn emergency_flag(&self) -> EmergencyFlag {
        self.emergency.clone()
    }

    pub fn sink_handle(&self) -> Arc<Mutex<MotorSink>> {
        self.sink.clone()
    }

    pub fn set_max_speed(&mut self, max_speed: f64) {
        self.max_speed = max_speed.clamp(0.0, 1.0);
    }

    /// Translate `cmd` into a wheel command, apply it to the sink, and
    /// return it (for observability/tests). Synchronous except for a
    /// brief sink-mutex acquisition — never blocks on I/O.
    pub async fn tick(&mut self, cmd: DriveCommand, now_ms: u64) -> WheelCommand {
        if self.emergency.is_set() {
            self.prev = WheelCommand::ZERO;
            let mut sink = self.sink.lock().await;
            sink.apply_emergency_stop();
            return WheelCommand::ZERO;
        }

        let dead_man_ms = (self.config.safety_timeout_s * 1_000.0) as u64;
        let command_age_ms = now_ms.saturating_sub(cmd.generated_at_ms);
        let out = if command_age_ms > dead_man_ms {
            warn!(command_age_ms, "motor dead-man timeout, zeroing output");
            self.ramp_toward(WheelCommand::ZERO)
        } else {
            let raw = self.raw_from_command(cmd);
            let normalized = Self::normalize_magnitude(raw);
            let ramped = self.ramp_toward(normalized);
            self.cap_to_max_speed(ramped)
        };

        self.prev = out;
        let mut sink = self.sink.lock().await;
        sink.apply_wheels(out);
        out
    }

    fn raw_from_command(&self, cmd: DriveCommand) -> WheelCommand {
        let turn = cmd.turn_rate * self.config.turn_sensitivity;
        WheelCommand {
            left: cmd.speed - turn,
            right: cmd.speed + turn,
        }
    }

    fn normalize_magnitude(raw: WheelCommand) -> WheelCommand {
        let m = raw.left.abs().max(raw.right.abs()).max(1.0);
        WheelCommand {
            left: raw.left / m,
            right: raw.right / m,
        }
    }

    fn ramp_toward(&self, target: WheelCommand) -> WheelCommand {
        let ramp = self.config.ramp_rate;
        WheelCommand {
            left: ramp_component(self.prev.left, target.left, ramp),
            right: ramp_component(self.prev.right, target.right, ramp),
        }
    }

    fn cap_to_max_speed(&self, cmd: WheelCommand) -> WheelCommand {
        let clamped = WheelCommand {
            left: cmd.left.clamp(-1.0, 1.0),
            right: cmd.right.clamp(-1.0, 1.0),
        };
        let peak = clamped.left.abs().max(clamped.right.abs());
        if peak > self.max_speed && peak > 0.0 {
            let scale = self.max_speed / peak;
            WheelCommand {
                left: clamped.left * scale,
                right: clamped.right * scale,
            }
        } else {
            clamped
        }
    }
}

fn ramp_component(prev: f64, target: f64, ramp_rate: f64) -> f64 {
    let delta = target - prev;
    if delta.abs() <= ramp_rate {
        target
    } else {
        prev + delta.signum() * ramp_rate
    }
}

/// Dedicated execution context (§5 "motor watchdog"): polls the emergency
/// flag every 100 ms and forces the sink to zero immediately, independent
/// of the supervisor's tick cadence. Guarantees the < 100 ms latency bound
/// even if the next scheduled tick is still hundreds of milliseconds away.
pub async fn run_watchdog(sink: Arc<Mutex<MotorSink>>, emergency: EmergencyFlag) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        interval.tick().await;
        if emergency.is_set() {
            let mut s = sink.lock().await;
            s.apply_emergency_stop();
        }
    }
}
