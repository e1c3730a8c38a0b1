//! eway-monitor: drive one Eway device from the command line
//!
//! Connects to a single device, refreshes it on the family's scan interval and
//! logs its readings after every refresh. Ctrl-C shuts the session down.

use anyhow::Context;
use clap::Parser;
use eway_rust::{
    build_coordinator,
    config::EwayConfig,
    logging::{init_logging, LogConfig},
    registry::{FirmwareListener, InMemoryRegistry},
    Coordinator, DeviceFamily, DeviceIdentity, Protocol, ReadingKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Eway device monitor
#[derive(Parser, Debug)]
#[command(name = "eway-monitor")]
#[command(about = "Monitor an Eway charger, energy storage unit, CT meter or smart plug")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Device host or IP address
    #[arg(long, env = "EWAY_HOST")]
    host: String,

    /// Device port (family default when omitted)
    #[arg(long)]
    port: Option<u16>,

    /// charger, energy_storage, ct or smart_plug
    #[arg(long, default_value = "charger")]
    family: DeviceFamily,

    /// Device id (chargers)
    #[arg(long, default_value = "")]
    device_id: String,

    /// Device serial number
    #[arg(long, default_value = "")]
    device_sn: String,

    /// TOML configuration file
    #[arg(long, env = "EWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Refresh once and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<EwayConfig> {
        let mut config = match &self.config {
            Some(path) => EwayConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => EwayConfig::default(),
        };
        config.apply_env().context("applying environment overrides")?;
        Ok(config)
    }

    fn identity(&self, config: &EwayConfig) -> DeviceIdentity {
        let port = self.port.unwrap_or(match self.family.protocol() {
            Protocol::WebSocket => config.websocket.port,
            Protocol::HttpRpc => self.family.default_port(),
        });
        DeviceIdentity::new(self.family, &self.host)
            .with_port(port)
            .with_device_id(&self.device_id)
            .with_device_sn(&self.device_sn)
    }
}

async fn refresh_and_report(coordinator: &dyn Coordinator) {
    let identity = coordinator.identity();
    match coordinator.refresh().await {
        Ok(snapshot) => {
            for kind in ReadingKind::for_family(identity.family) {
                if let Some(value) = kind.read(&snapshot) {
                    info!(
                        device = %identity,
                        "{}: {}{}",
                        kind.name(),
                        value,
                        kind.unit().map(|u| format!(" {u}")).unwrap_or_default()
                    );
                }
            }
        }
        Err(e) => warn!(device = %identity, "Device unavailable: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    init_logging(LogConfig::from_settings(&config.logging))
        .map_err(|e| anyhow::anyhow!("initializing logging: {e}"))?;

    let identity = args.identity(&config);
    info!("Starting eway-monitor for {} ({})", identity.display_name(), identity);

    let coordinator = build_coordinator(identity, &config).context("building coordinator")?;
    let registry = Arc::new(InMemoryRegistry::new());
    let listener = FirmwareListener::spawn(coordinator.store(), registry);

    if args.once {
        refresh_and_report(coordinator.as_ref()).await;
    } else {
        let mut ticker = tokio::time::interval(coordinator.scan_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => refresh_and_report(coordinator.as_ref()).await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
    }

    if let Err(e) = coordinator.shutdown().await {
        error!("Shutdown failed: {e}");
    }
    listener.abort();
    Ok(())
}
