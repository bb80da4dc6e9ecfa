//! # pihub-agent
//!
//! pihub binary: loads settings, starts the WebSocket hub and wires the
//! sensor relay, clock heartbeat and actuator controller into it.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pihub_control::{ActuatorController, ServoBank, command_queue};
use pihub_core::{EventSink, HubClock};
use pihub_sensor::{SimulatedGyro, relay_sensor, run_clock};
use pihub_server::console::{run_console, spawn_stdin_lines};
use pihub_server::shutdown::ShutdownCoordinator;
use pihub_server::{HubServer, ServerConfig};
use pihub_settings::HubSettings;
use tracing::{info, warn};

/// pihub event hub.
#[derive(Parser, Debug)]
#[command(name = "pihub", about = "WebSocket event hub for sensors and actuators")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.pihub/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `pihub_server=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Maximum concurrent WebSocket connections (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Do not start the sensor relay.
    #[arg(long)]
    no_sensor: bool,

    /// Do not read operator commands from stdin.
    #[arg(long)]
    no_console: bool,
}

impl Cli {
    fn apply(&self, settings: &mut HubSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if self.no_sensor {
            settings.sensor.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(pihub_settings::settings_path);
    let mut settings = pihub_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);

    pihub_core::logging::init_subscriber(&settings.logging.level);
    info!(path = %settings_path.display(), "settings loaded");

    let metrics = match pihub_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let clock = HubClock::start();
    let (commands_tx, commands_rx) = command_queue(&settings.commands);
    let mut server = HubServer::new(ServerConfig::from(&settings.server), Some(commands_tx));
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }
    let server = Arc::new(server);
    let sink: Arc<dyn EventSink> = server.hub().clone();

    // Producers outlive the listener so draining sessions still see events
    // and their last commands are applied.
    let coordinator = ShutdownCoordinator::new();
    let mut tasks = Vec::new();

    let bank = Arc::new(ServoBank::new(settings.actuators.clone()));
    let controller = ActuatorController::new(bank, sink.clone(), clock, &settings.commands);
    tasks.push(tokio::spawn(controller.run(commands_rx, coordinator.token())));

    if settings.sensor.enabled {
        let gyro = SimulatedGyro::from_settings(&settings.sensor, clock);
        tasks.push(tokio::spawn(relay_sensor(
            sink.clone(),
            Box::new(gyro),
            coordinator.token(),
        )));
    } else {
        info!("sensor relay disabled");
    }

    tasks.push(tokio::spawn(run_clock(
        sink,
        clock,
        Duration::from_millis(settings.clock.tick_interval_ms),
        coordinator.token(),
    )));

    let (addr, mut serving) = server
        .listen()
        .await
        .context("Failed to start hub server")?;
    info!(%addr, "pihub listening on ws://{addr}");

    if !cli.no_console {
        tasks.push(tokio::spawn(run_console(
            spawn_stdin_lines(),
            server.clone(),
            coordinator.token(),
        )));
    }

    let served = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("interrupt received, shutting down");
            server.stop();
            serving.await
        }
        done = &mut serving => done,
    };

    coordinator.graceful_shutdown(tasks, None).await;

    served
        .context("Hub server task panicked")?
        .context("Hub server failed")?;
    info!("pihub stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_keep_settings() {
        let cli = Cli::try_parse_from(["pihub"]).unwrap();
        let mut settings = HubSettings::default();
        cli.apply(&mut settings);
        let defaults = HubSettings::default();
        assert_eq!(settings.server.host, defaults.server.host);
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.sensor.enabled, defaults.sensor.enabled);
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::try_parse_from([
            "pihub",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--log-level",
            "debug",
            "--max-connections",
            "2",
            "--no-sensor",
        ])
        .unwrap();
        let mut settings = HubSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.server.max_connections, 2);
        assert!(!settings.sensor.enabled);
    }

    #[test]
    fn settings_path_flag() {
        let cli = Cli::try_parse_from(["pihub", "--settings", "/etc/pihub.json"]).unwrap();
        assert_eq!(cli.settings, Some(PathBuf::from("/etc/pihub.json")));
        assert!(!cli.no_console);
    }
}
