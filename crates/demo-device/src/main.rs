//! Reference device process: a fleet of LED lamps attached to an edge
//! gateway.
//!
//! Each lamp has properties `power` (bool) and `brightness` (int, 0..=100),
//! a `blink` service, and a `ledBroken` event raised while it is switched on
//! at zero brightness.  On every (re)connect all lamps are brought online;
//! while connected their properties are reported periodically.
//!
//! Usage:
//!   leda-demo-device [config.toml]
//!
//! Config (every `[gateway]` key is optional):
//!
//! ```toml
//! report_interval_secs = 15
//!
//! [gateway]
//! url = "ws://127.0.0.1:17682"
//!
//! [[devices]]
//! product_key = "a1b2c3"
//! device_name = "ledDev001"
//! ```

mod lamp;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use leda_sdk::{
    ClientConfig, ConnectionState, DeviceAccess, DeviceAddress, DeviceCallbacks,
    DeviceClientBuilder, DeviceDatum, SdkError,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::lamp::LampFleet;

#[derive(Debug, Deserialize)]
struct DemoConfig {
    #[serde(default)]
    gateway: ClientConfig,
    #[serde(default = "d_report_interval_secs")]
    report_interval_secs: u64,
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    product_key: String,
    device_name: String,
}

fn d_report_interval_secs() -> u64 {
    15
}

/// How long a Ctrl-C waits for each `offlineDevice` acknowledgement.
const OFFLINE_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demo-device.toml".into());
    let config = load_config(&path)?;
    anyhow::ensure!(!config.devices.is_empty(), "{path}: no [[devices]] configured");

    let fleet = Arc::new(LampFleet::new(
        config
            .devices
            .iter()
            .map(|d| DeviceAddress::new(&d.product_key, &d.device_name))
            .collect(),
    ));

    let callbacks = DeviceCallbacks::from_arc(fleet.clone())
        .on_state_change(|state: ConnectionState| {
            tracing::info!(%state, "gateway link");
        })
        .on_report_reply(|message_id: u32, code: i32| {
            if code == 0 {
                tracing::debug!(message_id, "report acknowledged");
            } else {
                tracing::warn!(message_id, code, "report rejected");
            }
        });

    let client = DeviceClientBuilder::from_config(&config.gateway).build(callbacks)?;
    let access = client.access();
    let shutdown = CancellationToken::new();
    let stop_reports = CancellationToken::new();

    tracing::info!(
        url = %config.gateway.url,
        devices = fleet.addresses().len(),
        "starting demo device"
    );
    let driver = client.spawn(shutdown.clone());
    let reporter = tokio::spawn(report_loop(
        access.clone(),
        fleet.clone(),
        Duration::from_secs(config.report_interval_secs.max(1)),
        stop_reports.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("caught Ctrl-C, taking devices offline");

    stop_reports.cancel();
    let _ = reporter.await;
    take_offline(&access, &fleet).await;
    shutdown.cancel();

    match driver.await? {
        Ok(()) | Err(SdkError::Shutdown) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn load_config(path: &str) -> anyhow::Result<DemoConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    toml::from_str(&text).with_context(|| format!("parsing {path}"))
}

/// Online every lamp after each connect, then report until the link drops.
async fn report_loop(
    access: DeviceAccess,
    fleet: Arc<LampFleet>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut states = access.subscribe_state();
    loop {
        let connected = tokio::select! {
            ok = async { states.wait_for(|s| *s == ConnectionState::Connected).await.is_ok() } => ok,
            _ = shutdown.cancelled() => return,
        };
        if !connected {
            return;
        }

        for device in fleet.addresses() {
            match access.online(device).await {
                Ok(reply) if reply.is_success() => fleet.set_online(device, true),
                Ok(reply) => {
                    tracing::warn!(device = %device, code = reply.code, "gateway refused online")
                }
                Err(e) => tracing::warn!(device = %device, error = %e, "online failed"),
            }
        }

        // Any transition, even a drop and reconnect between two ticks, means
        // the gateway has forgotten the lamps.
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => report_once(&access, &fleet),
                changed = states.changed() => {
                    fleet.mark_all_offline();
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

fn report_once(access: &DeviceAccess, fleet: &LampFleet) {
    for device in fleet.online() {
        let Some(data) = fleet.snapshot(&device) else {
            continue;
        };
        if let Err(e) = access.report_properties(&device, &data) {
            tracing::warn!(device = %device, error = %e, "property report failed");
        }
        if fleet.is_broken(&device) {
            let detail = [DeviceDatum::text("at", Utc::now().to_rfc3339())];
            if let Err(e) = access.report_event(&device, "ledBroken", &detail) {
                tracing::warn!(device = %device, error = %e, "event report failed");
            }
        }
    }
}

async fn take_offline(access: &DeviceAccess, fleet: &LampFleet) {
    if access.state() != ConnectionState::Connected {
        return;
    }
    for device in fleet.online() {
        match tokio::time::timeout(OFFLINE_GRACE, access.offline(&device)).await {
            Ok(Ok(_)) => fleet.set_online(&device, false),
            Ok(Err(e)) => tracing::warn!(device = %device, error = %e, "offline failed"),
            Err(_) => tracing::warn!(device = %device, "offline not acknowledged"),
        }
    }
}
