//! Device simulator entry point.
//!
//! ```text
//! stationlink-sim --bind 0.0.0.0:7700 --event-interval-ms 500
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stationlink_sim::SimulatorConfig;

/// Simulated StationLink base-station device.
#[derive(Debug, Parser)]
#[command(name = "stationlink-sim", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7700", env = "STATIONLINK_SIM_BIND")]
    bind: SocketAddr,

    /// Period of pushed metric events in milliseconds.  0 disables events.
    #[arg(long, default_value_t = 1000)]
    event_interval_ms: u64,

    /// Temperature in °C above which a threshold alert is raised.
    #[arg(long, default_value_t = 75.0)]
    temperature_threshold: f32,

    /// Corrupt every Nth outgoing frame.  0 disables.
    #[arg(long, default_value_t = 0)]
    corrupt_every: u32,

    /// Read requests but never answer them.
    #[arg(long)]
    silent: bool,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            bind: self.bind,
            event_interval: Duration::from_millis(self.event_interval_ms),
            temperature_threshold: self.temperature_threshold,
            respond: !self.silent,
            corrupt_every: self.corrupt_every,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let simulator = stationlink_sim::spawn(args.to_config())
        .await
        .context("failed to start device simulator")?;
    info!(addr = %simulator.local_addr(), "simulator ready, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown signal received");
    simulator.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_simulator_config() {
        let args = Args::parse_from(["stationlink-sim"]);

        assert_eq!(args.to_config(), SimulatorConfig::default());
    }

    #[test]
    fn test_silent_flag_disables_responses() {
        // Arrange
        let args = Args::parse_from([
            "stationlink-sim",
            "--bind",
            "0.0.0.0:9000",
            "--event-interval-ms",
            "0",
            "--silent",
        ]);

        // Act
        let config = args.to_config();

        // Assert
        assert!(!config.respond);
        assert_eq!(config.event_interval, Duration::ZERO);
        assert_eq!(config.bind.port(), 9000);
    }
}
