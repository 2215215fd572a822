//! `fan-monitor` — tach fault detection, trust-group evaluation, and
//! the power-off rule engine.

use std::time::Duration;

use log::{error, info, warn};
use phosphor_fand::broker::{MockBroker, ObjectBroker};
use phosphor_fand::config::{self, ConfigRoots, MonitorConfig};
use phosphor_fand::flight_recorder::FlightRecorder;
use phosphor_fand::monitor::{FanMonitor, MonitoredFan, RecordingInventory};
use phosphor_fand::poweroff::{ActionKind, Cause, PowerOffRule, RecordingPowerControl, Validity};
use phosphor_fand::tach::{FaultMethod, TachSensor};
use phosphor_fand::trust::{NonZeroSpeedTrustGroup, TrustManager};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::interval;

const TACH_INTERFACE: &str = "xyz.openbmc_project.Sensor.Value";

fn load_monitor_config(roots: &ConfigRoots) -> anyhow::Result<MonitorConfig> {
    let path = config::resolve_config_path(roots, "config.json")
        .ok_or_else(|| anyhow::anyhow!("config.json not found in any search path"))?;
    Ok(config::load_json(&path)?)
}

fn build_monitor(cfg: &MonitorConfig) -> FanMonitor {
    let mut monitor = FanMonitor::new(cfg.num_nonfunc_rotors_before_error);
    for fan_cfg in &cfg.fans {
        let mut fan = MonitoredFan::new(fan_cfg.name.clone(), fan_cfg.num_rotors_for_nonfunc);
        fan.missing_delay = cfg.fan_missing_err_delay;
        for sensor_cfg in &fan_cfg.sensors {
            let method = if sensor_cfg.method == "count" { FaultMethod::Count } else { FaultMethod::TimeBased };
            let mut sensor = TachSensor::new(sensor_cfg.name.clone(), TACH_INTERFACE, method, sensor_cfg.threshold);
            sensor.has_target = sensor_cfg.has_target;
            sensor.factor = sensor_cfg.factor;
            sensor.offset = sensor_cfg.offset;
            sensor.deviation_pct = cfg.deviation;
            sensor.ignore_above_max = sensor_cfg.ignore_above_max;
            sensor.count_interval = cfg.count_interval;
            if let Some(delay) = sensor_cfg.nonfunc_rotor_err_delay {
                fan.error_delay = delay;
            }
            fan.rotors.insert(sensor_cfg.name.clone(), sensor);
        }
        monitor.fans.insert(fan_cfg.name.clone(), fan);
    }
    monitor
}

fn build_trust_manager(cfg: &MonitorConfig) -> TrustManager {
    let mut trust = TrustManager::new();
    for group_cfg in &cfg.sensor_trust_groups {
        trust.add_group(group_cfg.sensors.clone(), NonZeroSpeedTrustGroup::new(group_cfg.sensors.clone()));
    }
    trust
}

fn parse_validity(raw: &str, rule_name: &str) -> Validity {
    match raw {
        "at_pgood" => Validity::AtPgood,
        "runtime" => Validity::Runtime,
        other => {
            warn!("power-off rule {rule_name}: unrecognized validity '{other}', defaulting to runtime");
            Validity::Runtime
        }
    }
}

fn build_power_off_rules(cfg: &MonitorConfig) -> Vec<PowerOffRule> {
    cfg.fault_handling
        .power_off_config
        .iter()
        .map(|poc| {
            let validity = parse_validity(&poc.validity, &poc.name);
            let cause = match &poc.cause {
                config::CauseConfig::MissingFanFru { threshold } => Cause::MissingFanFru { threshold: *threshold },
                config::CauseConfig::NonfuncFanRotor { threshold } => Cause::NonfuncFanRotor { threshold: *threshold },
            };
            let action = match &poc.action {
                config::ActionConfig::Hard { delay_secs } => ActionKind::Hard { delay: Duration::from_secs(*delay_secs) },
                config::ActionConfig::Soft { delay_secs } => ActionKind::Soft { delay: Duration::from_secs(*delay_secs) },
                config::ActionConfig::Epow { service_delay_secs, meltdown_delay_secs } => ActionKind::Epow {
                    service_delay: Duration::from_secs(*service_delay_secs),
                    meltdown_delay: Duration::from_secs(*meltdown_delay_secs),
                },
            };
            PowerOffRule::new(poc.name.clone(), validity, cause, action)
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let roots = ConfigRoots::new("phosphor-fand");
    let mut cfg = match load_monitor_config(&roots) {
        Ok(c) => c,
        Err(e) => {
            error!("fatal: failed to load monitor configuration: {e}");
            std::process::exit(1);
        }
    };
    let mut monitor = build_monitor(&cfg);
    let mut trust = build_trust_manager(&cfg);
    let mut rules = build_power_off_rules(&cfg);
    let mut inventory = RecordingInventory::default();
    let mut power = RecordingPowerControl::default();
    let mut recorder = FlightRecorder::new();
    // A production build would swap this for a `zbus`-backed adapter;
    // the domain only ever talks to the `ObjectBroker` trait.
    let broker = MockBroker::new();

    info!("fan-monitor started with {} fans", monitor.fans.len());

    tokio::time::sleep(cfg.monitor_start_delay).await;
    // Eligible exactly once, the tick right after the power-good delay.
    let mut at_pgood_window = true;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut ticker = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = tokio::time::Instant::now().into_std();

                for fan in monitor.fans.values_mut() {
                    for (name, sensor) in fan.rotors.iter_mut() {
                        if let Ok(value) = broker.get_property(name, TACH_INTERFACE, "Value") {
                            if let Some(v) = value.as_f64() {
                                sensor.update_tach(v, now);
                                trust.update_tach(name, v);
                            }
                        }
                    }
                }

                let errors = monitor.poll_all(now, &mut inventory);
                for err in &errors {
                    error!("FanError: fan={} rotor={} severity={:?}", err.fan, err.rotor, err.severity);
                    recorder.log(err.rotor.clone(), format!("fan {} rotor fault ({:?})", err.fan, err.severity), chrono::Utc::now());
                }

                let missing_frus = monitor.missing_fan_count();
                let nonfunc_rotors = monitor.total_nonfunctional_rotors();
                for rule in rules.iter_mut() {
                    if let Some(err) = errors.last() {
                        rule.note_error(err.clone());
                    }
                    let eligible = match rule.validity {
                        Validity::Runtime => true,
                        Validity::AtPgood => at_pgood_window,
                    };
                    if let Err(e) = rule.evaluate(missing_frus, nonfunc_rotors, eligible, now, &mut power, &recorder) {
                        error!("power-off rule {}: {e}", rule.name);
                    }
                }
                at_pgood_window = false;
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading monitor configuration");
                match load_monitor_config(&roots) {
                    Ok(new_cfg) => {
                        cfg = new_cfg;
                        monitor = build_monitor(&cfg);
                        trust = build_trust_manager(&cfg);
                        rules = build_power_off_rules(&cfg);
                    }
                    Err(e) => error!("reload failed, keeping previous configuration: {e}"),
                }
            }
            _ = sigusr1.recv() => {
                info!("SIGUSR1 received, writing debug dump");
                let json = serde_json::json!({
                    "total_nonfunctional_rotors": monitor.total_nonfunctional_rotors(),
                    "missing_fans": monitor.missing_fan_count(),
                    "flight_recorder": recorder.dump_text(),
                });
                if let Err(e) = std::fs::write("/tmp/fan_monitor_dump.json", json.to_string()) {
                    error!("debug dump failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
