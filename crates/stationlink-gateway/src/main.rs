//! StationLink gateway command-line entry point.
//!
//! Connects to one base-station device and runs a single operation against
//! it, or stays connected and logs everything the device pushes.
//!
//! ```text
//! stationlink ping
//! stationlink status
//! stationlink metrics temperature supply_voltage
//! stationlink exec set-transmit-power 40.5
//! stationlink monitor
//! ```
//!
//! Settings come from the TOML file named by `--config` (defaults apply when
//! it does not exist); `--host` and `--port` override the transport section.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stationlink_core::{Command, MetricKind};
use stationlink_gateway::application::handler::LoggingHandler;
use stationlink_gateway::application::session::{ConnectionState, Session};
use stationlink_gateway::infrastructure::storage::config::{load_config, GatewayConfig};
use stationlink_gateway::infrastructure::transport;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Talk to a base-station device over the StationLink protocol.
#[derive(Debug, Parser)]
#[command(name = "stationlink", version)]
struct Cli {
    /// Path to the gateway TOML configuration.
    #[arg(long, default_value = "stationlink.toml", env = "STATIONLINK_CONFIG")]
    config: PathBuf,

    /// Device host, overriding `transport.host`.
    #[arg(long, env = "STATIONLINK_HOST")]
    host: Option<String>,

    /// Device TCP port, overriding `transport.port`.
    #[arg(long, env = "STATIONLINK_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Round-trip a ping and print the latency.
    Ping {
        /// Number of pings to send.
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },
    /// Print the device status.
    Status,
    /// Print metric values.  With no names, every metric is requested.
    Metrics {
        /// Metric names (e.g. `temperature`, `fan_speed`) or numeric ids.
        names: Vec<String>,
    },
    /// Execute a control command.
    Exec {
        #[command(subcommand)]
        command: ExecCommand,
    },
    /// Stay connected and log every event the device pushes.
    Monitor,
}

#[derive(Debug, Subcommand)]
enum ExecCommand {
    Reboot,
    ResetStatistics,
    SetTransmitPower {
        /// Target output power in dBm.
        dbm: f32,
    },
    RunSelfTest,
    /// Vendor command by id with raw argument bytes.
    Raw {
        id: u8,
        args: Vec<u8>,
    },
}

impl From<ExecCommand> for Command {
    fn from(value: ExecCommand) -> Self {
        match value {
            ExecCommand::Reboot => Command::Reboot,
            ExecCommand::ResetStatistics => Command::ResetStatistics,
            ExecCommand::SetTransmitPower { dbm } => Command::SetTransmitPower { dbm },
            ExecCommand::RunSelfTest => Command::RunSelfTest,
            ExecCommand::Raw { id, args } => Command::Raw { id, args },
        }
    }
}

impl Cli {
    fn apply_overrides(&self, config: &mut GatewayConfig) {
        if let Some(host) = &self.host {
            config.transport.host = host.clone();
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
    }
}

/// Parses a metric name (`snake_case`) or a numeric id.
fn parse_metric(name: &str) -> anyhow::Result<MetricKind> {
    name.parse::<MetricKind>().context("invalid metric argument")
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let transport = transport::from_config(&config.transport)?;
    info!(endpoint = %transport.endpoint(), "StationLink gateway starting");
    let session = Session::new(
        transport,
        config.session.to_session_config(),
        Arc::new(LoggingHandler),
    );
    session
        .start()
        .await
        .context("could not connect to device")?;

    let outcome = run(&session, cli.command).await;
    session.stop().await;
    outcome
}

async fn run(session: &Session, action: Action) -> anyhow::Result<()> {
    match action {
        Action::Ping { count } => {
            for i in 0..count {
                let rtt = session.ping().await?;
                println!("pong {}: {:.1} ms", i + 1, rtt.as_secs_f64() * 1000.0);
            }
        }
        Action::Status => {
            let status = session.request_status().await?;
            println!("state:         {:?}", status.state);
            println!("uptime:        {} s", status.uptime_secs);
            println!("active alarms: {}", status.active_alarms);
            println!("cpu load:      {} %", status.cpu_load_pct);
            println!("temperature:   {:.1} °C", status.temperature_c);
        }
        Action::Metrics { names } => {
            let kinds = names
                .iter()
                .map(|n| parse_metric(n))
                .collect::<anyhow::Result<Vec<_>>>()?;
            for metric in session.request_metrics(&kinds).await? {
                println!("{metric}");
            }
        }
        Action::Exec { command } => {
            let result = session.execute_command(&command.into()).await?;
            println!("{:?}: {}", result.status, result.message);
            if !result.is_success() {
                bail!("command 0x{:02X} did not succeed", result.command_id);
            }
        }
        Action::Monitor => {
            info!("monitoring device, press Ctrl+C to stop");
            let mut states = session.subscribe_state();
            loop {
                tokio::select! {
                    signal = tokio::signal::ctrl_c() => {
                        signal.context("failed to listen for Ctrl+C")?;
                        info!("shutdown signal received");
                        break;
                    }
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *states.borrow();
                        if state != ConnectionState::Connected {
                            warn!(?state, "device link not connected");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_metrics_with_names() {
        let cli = Cli::parse_from(["stationlink", "metrics", "temperature", "fan_speed"]);

        match cli.command {
            Action::Metrics { names } => assert_eq!(names, vec!["temperature", "fan_speed"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_overrides_host_and_port() {
        // Arrange
        let cli = Cli::parse_from(["stationlink", "--host", "10.1.1.1", "--port", "9000", "status"]);
        let mut config = GatewayConfig::default();

        // Act
        cli.apply_overrides(&mut config);

        // Assert
        assert_eq!(config.transport.host, "10.1.1.1");
        assert_eq!(config.transport.port, 9000);
    }

    #[test]
    fn test_exec_set_transmit_power_maps_to_command() {
        let cli = Cli::parse_from(["stationlink", "exec", "set-transmit-power", "40.5"]);

        let Action::Exec { command } = cli.command else {
            panic!("expected exec");
        };

        assert_eq!(Command::from(command), Command::SetTransmitPower { dbm: 40.5 });
    }

    #[test]
    fn test_parse_metric_accepts_names_and_ids() {
        assert_eq!(parse_metric("supply_voltage").unwrap(), MetricKind::SupplyVoltage);
        assert_eq!(parse_metric("temperature").unwrap(), MetricKind::Temperature);
        assert_eq!(parse_metric("10").unwrap(), MetricKind::FanSpeed);
        assert_eq!(parse_metric("200").unwrap(), MetricKind::Unknown(200));
        assert!(parse_metric("warp_core").is_err());
    }
}
