//! `fan-control` — the event-driven zone/fan target arbitration daemon.
//! Single-threaded tokio event loop: broker signal dispatch and timer
//! expirations are the only suspension points.

use std::path::PathBuf;
use std::time::Duration;

use log::{error, info};
use phosphor_fand::broker::MockBroker;
use phosphor_fand::config::ConfigRoots;
use phosphor_fand::manager::ControlManager;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::interval;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let roots = ConfigRoots::new("phosphor-fand");
    let mut manager = match ControlManager::load(&roots, PathBuf::from("/tmp/fan_control_dump.json")) {
        Ok(m) => m,
        Err(e) => {
            error!("fatal: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    info!("fan-control started with {} zones", manager.config.zones.len());

    // A production build would swap this for a `zbus`-backed adapter;
    // the domain only ever talks to the `ObjectBroker` trait.
    let mut broker = MockBroker::new();
    manager.fire_init_triggers(&broker);

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut ticker = interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let events = broker.drain_events();
                if !events.is_empty() {
                    manager.process_broker_events(events);
                }
                manager.tick_timers(tokio::time::Instant::now().into_std());
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading configuration");
                manager.reload(&roots);
                manager.fire_init_triggers(&broker);
            }
            _ = sigusr1.recv() => {
                info!("SIGUSR1 received, writing debug dump");
                if let Err(e) = manager.dump() {
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
