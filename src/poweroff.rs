//! Power-off rule engine (C13) — evaluates cause classes against fan
//! health and drives hard/soft/EPOW power-off actions with cancelable
//! and non-cancelable stages.

use std::time::{Duration, Instant};

use log::{error, warn};

use crate::error::Result;
use crate::flight_recorder::FlightRecorder;
use crate::monitor::FanError;

/// Port the rule engine issues power-off requests and thermal-alert
/// writes through.
pub trait PowerControlPort {
    fn hard_power_off(&mut self) -> Result<()>;
    fn soft_power_off(&mut self) -> Result<()>;
    fn set_thermal_alert(&mut self, asserted: bool) -> Result<()>;
    fn request_dump(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct RecordingPowerControl {
    pub hard_off_count: u32,
    pub soft_off_count: u32,
    pub thermal_alert: bool,
    pub dump_requested: u32,
}

impl PowerControlPort for RecordingPowerControl {
    fn hard_power_off(&mut self) -> Result<()> {
        self.hard_off_count += 1;
        Ok(())
    }

    fn soft_power_off(&mut self) -> Result<()> {
        self.soft_off_count += 1;
        Ok(())
    }

    fn set_thermal_alert(&mut self, asserted: bool) -> Result<()> {
        self.thermal_alert = asserted;
        Ok(())
    }

    fn request_dump(&mut self) -> Result<()> {
        self.dump_requested += 1;
        Ok(())
    }
}

/// A cause class, polling fan health to decide satisfaction.
#[derive(Debug, Clone)]
pub enum Cause {
    MissingFanFru { threshold: u64 },
    NonfuncFanRotor { threshold: u64 },
}

impl Cause {
    fn satisfied(&self, missing_frus: u64, nonfunc_rotors: u64) -> bool {
        match self {
            Cause::MissingFanFru { threshold } => missing_frus >= *threshold,
            Cause::NonfuncFanRotor { threshold } => nonfunc_rotors >= *threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    AtPgood,
    Runtime,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    Hard { delay: Duration },
    Soft { delay: Duration },
    Epow { service_delay: Duration, meltdown_delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EpowStage {
    Idle,
    Service,
    Meltdown,
}

pub struct PowerOffRule {
    pub name: String,
    pub validity: Validity,
    pub cause: Cause,
    pub action: ActionKind,
    satisfied: bool,
    armed_since: Option<Instant>,
    epow_stage: EpowStage,
    epow_stage_since: Option<Instant>,
    /// The most recent `FanError` observed by the caller's monitor
    /// poll, re-emitted at elevated severity when this rule fires.
    last_error: Option<FanError>,
}

impl PowerOffRule {
    pub fn new(name: impl Into<String>, validity: Validity, cause: Cause, action: ActionKind) -> Self {
        Self {
            name: name.into(),
            validity,
            cause,
            action,
            satisfied: false,
            armed_since: None,
            epow_stage: EpowStage::Idle,
            epow_stage_since: None,
            last_error: None,
        }
    }

    /// Record the most recent fan error seen by the monitor poll driving
    /// this rule, so it can be re-emitted at elevated severity when the
    /// rule actually fires.
    pub fn note_error(&mut self, error: FanError) {
        self.last_error = Some(error);
    }

    /// Re-emit the last observed fan error at `Error` severity,
    /// regardless of the severity it originally carried — a power-off
    /// firing is itself evidence the condition is no longer informational.
    /// Also captures first-failure data from `recorder` so the event log
    /// has something to attach, logging wherever it landed.
    fn escalate_last_error(&self, recorder: &FlightRecorder) {
        if let Some(err) = &self.last_error {
            error!(
                "power-off rule {}: escalating last fan error to critical severity: fan={} rotor={} (originally {:?})",
                self.name, err.fan, err.rotor, err.severity
            );
        }
        match recorder.capture_ffdc(&format!("power-off rule {} fired", self.name)) {
            Ok(path) => warn!("power-off rule {}: FFDC captured at {}", self.name, path.display()),
            Err(e) => warn!("power-off rule {}: FFDC capture failed: {e}", self.name),
        }
    }

    /// Re-evaluate this rule on a fan-health change. `eligible` is
    /// false outside the rule's validity window (e.g. a `runtime` rule
    /// is always eligible once powered on; `atPgood` only at the instant
    /// power comes up).
    pub fn evaluate(
        &mut self,
        missing_frus: u64,
        nonfunc_rotors: u64,
        eligible: bool,
        now: Instant,
        power: &mut dyn PowerControlPort,
        recorder: &FlightRecorder,
    ) -> Result<()> {
        let newly_satisfied = eligible && self.cause.satisfied(missing_frus, nonfunc_rotors);

        if newly_satisfied && !self.satisfied {
            self.satisfied = true;
            self.armed_since = Some(now);
            warn!("power-off rule {} armed", self.name);
        } else if !newly_satisfied && self.satisfied {
            self.satisfied = false;
            if self.epow_stage != EpowStage::Meltdown {
                self.armed_since = None;
                if self.epow_stage == EpowStage::Service {
                    self.epow_stage = EpowStage::Idle;
                    self.epow_stage_since = None;
                }
            }
        }

        self.tick(now, power, recorder)
    }

    /// Advance any armed timer; call on every poll regardless of
    /// whether `evaluate` just ran, so delay-based timers still expire.
    pub fn tick(&mut self, now: Instant, power: &mut dyn PowerControlPort, recorder: &FlightRecorder) -> Result<()> {
        if !self.satisfied && self.epow_stage != EpowStage::Meltdown {
            return Ok(());
        }

        match &self.action {
            ActionKind::Hard { delay } => {
                if let Some(since) = self.armed_since {
                    if now.duration_since(since) >= *delay {
                        error!("power-off rule {}: hard power off", self.name);
                        self.escalate_last_error(recorder);
                        power.request_dump()?;
                        power.hard_power_off()?;
                        self.armed_since = None;
                    }
                }
            }
            ActionKind::Soft { delay } => {
                if let Some(since) = self.armed_since {
                    if now.duration_since(since) >= *delay {
                        error!("power-off rule {}: soft power off", self.name);
                        self.escalate_last_error(recorder);
                        power.request_dump()?;
                        power.soft_power_off()?;
                        self.armed_since = None;
                    }
                }
            }
            ActionKind::Epow { service_delay, meltdown_delay } => {
                self.tick_epow(now, *service_delay, *meltdown_delay, power, recorder)?;
            }
        }
        Ok(())
    }

    fn tick_epow(
        &mut self,
        now: Instant,
        service_delay: Duration,
        meltdown_delay: Duration,
        power: &mut dyn PowerControlPort,
        recorder: &FlightRecorder,
    ) -> Result<()> {
        match self.epow_stage {
            EpowStage::Idle => {
                if self.satisfied {
                    self.epow_stage = EpowStage::Service;
                    self.epow_stage_since = Some(self.armed_since.unwrap_or(now));
                }
            }
            EpowStage::Service => {
                if let Some(since) = self.epow_stage_since {
                    if now.duration_since(since) >= service_delay {
                        power.set_thermal_alert(true)?;
                        self.epow_stage = EpowStage::Meltdown;
                        self.epow_stage_since = Some(now);
                    }
                }
            }
            EpowStage::Meltdown => {
                if let Some(since) = self.epow_stage_since {
                    if now.duration_since(since) >= meltdown_delay {
                        error!("power-off rule {}: EPOW meltdown, hard power off", self.name);
                        self.escalate_last_error(recorder);
                        power.request_dump()?;
                        power.hard_power_off()?;
                        self.epow_stage = EpowStage::Idle;
                        self.epow_stage_since = None;
                        self.satisfied = false;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn is_meltdown_armed(&self) -> bool {
        self.epow_stage == EpowStage::Meltdown
    }
}

/// Fan-controller-offline safeguard (C9+C13 interaction): if no rotor
/// sensor for any fan appeared on the bus at power-on, log a critical
/// event and hard power off.
pub fn check_fan_controller_offline(any_rotor_seen: bool, power: &mut dyn PowerControlPort) -> Result<bool> {
    if any_rotor_seen {
        return Ok(false);
    }
    error!("FanControllerOffline: no rotor sensors appeared on the bus at power-on");
    power.request_dump()?;
    power.hard_power_off()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_power_off_fires_after_delay() {
        let mut rule = PowerOffRule::new(
            "missing-fans",
            Validity::Runtime,
            Cause::MissingFanFru { threshold: 2 },
            ActionKind::Hard { delay: Duration::from_millis(20) },
        );
        let mut power = RecordingPowerControl::default();
        let recorder = FlightRecorder::new();
        let start = Instant::now();
        rule.evaluate(2, 0, true, start, &mut power, &recorder).unwrap();
        assert_eq!(power.hard_off_count, 0);
        rule.tick(start + Duration::from_millis(30), &mut power, &recorder).unwrap();
        assert_eq!(power.hard_off_count, 1);
    }

    #[test]
    fn cancel_honored_before_delay_expires() {
        let mut rule = PowerOffRule::new(
            "missing-fans",
            Validity::Runtime,
            Cause::MissingFanFru { threshold: 2 },
            ActionKind::Hard { delay: Duration::from_millis(50) },
        );
        let mut power = RecordingPowerControl::default();
        let recorder = FlightRecorder::new();
        let start = Instant::now();
        rule.evaluate(2, 0, true, start, &mut power, &recorder).unwrap();
        rule.evaluate(0, 0, true, start + Duration::from_millis(10), &mut power, &recorder).unwrap();
        rule.tick(start + Duration::from_millis(60), &mut power, &recorder).unwrap();
        assert_eq!(power.hard_off_count, 0);
    }

    #[test]
    fn epow_meltdown_stage_is_not_cancelable() {
        let mut rule = PowerOffRule::new(
            "epow",
            Validity::Runtime,
            Cause::NonfuncFanRotor { threshold: 3 },
            ActionKind::Epow {
                service_delay: Duration::from_millis(10),
                meltdown_delay: Duration::from_millis(10),
            },
        );
        let mut power = RecordingPowerControl::default();
        let recorder = FlightRecorder::new();
        let start = Instant::now();
        rule.evaluate(0, 3, true, start, &mut power, &recorder).unwrap();
        rule.tick(start + Duration::from_millis(15), &mut power, &recorder).unwrap();
        assert!(power.thermal_alert);
        assert!(rule.is_meltdown_armed());
        // Cause clears, but meltdown stage should not be cancelable.
        rule.evaluate(0, 0, true, start + Duration::from_millis(16), &mut power, &recorder).unwrap();
        rule.tick(start + Duration::from_millis(30), &mut power, &recorder).unwrap();
        assert_eq!(power.hard_off_count, 1);
    }

    #[test]
    fn noted_error_is_escalated_before_hard_power_off() {
        use crate::monitor::ErrorSeverity;

        let mut rule = PowerOffRule::new(
            "missing-fans",
            Validity::Runtime,
            Cause::MissingFanFru { threshold: 2 },
            ActionKind::Hard { delay: Duration::from_millis(10) },
        );
        rule.note_error(FanError { fan: "fan0".into(), rotor: "rotor0".into(), severity: ErrorSeverity::Informational });
        let mut power = RecordingPowerControl::default();
        let recorder = FlightRecorder::new();
        let start = Instant::now();
        rule.evaluate(2, 0, true, start, &mut power, &recorder).unwrap();
        rule.tick(start + Duration::from_millis(20), &mut power, &recorder).unwrap();
        assert_eq!(power.hard_off_count, 1);
        assert!(rule.last_error.is_some());
    }

    #[test]
    fn fan_controller_offline_triggers_hard_power_off() {
        let mut power = RecordingPowerControl::default();
        let fired = check_fan_controller_offline(false, &mut power).unwrap();
        assert!(fired);
        assert_eq!(power.hard_off_count, 1);
        assert_eq!(power.dump_requested, 1);
    }
}
