//! TCP front end of the simulator.
//!
//! [`spawn`] binds a listener and runs the accept loop on a background task.
//! Every accepted connection gets its own [`SimulatedDevice`] and frame
//! parser, so several gateways can talk to the simulator at once without
//! seeing each other's state.
//!
//! The returned [`SimulatorHandle`] lets tests inject faults while the
//! simulator runs:
//!
//! - [`set_respond(false)`](SimulatorHandle::set_respond) turns the device
//!   silent: requests are read and dropped, and no events are pushed.
//! - [`set_corrupt_every(n)`](SimulatorHandle::set_corrupt_every) flips the
//!   last CRC byte of every `n`th frame written on a connection.
//! - [`disconnect_all`](SimulatorHandle::disconnect_all) drops every open
//!   connection, as a device reboot or a cable pull would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stationlink_core::{build_frame, FrameParser, Message};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout, Interval};
use tracing::{debug, error, info, warn};

use crate::device::SimulatedDevice;

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Configuration ─────────────────────────────────────────────────────────────

/// Settings for one simulator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Listen address.  Port 0 picks a free port; read it back from
    /// [`SimulatorHandle::local_addr`].
    pub bind: SocketAddr,
    /// Period of pushed metric events.  Zero disables them.
    pub event_interval: Duration,
    /// Temperature in °C above which a threshold alert is raised.
    pub temperature_threshold: f32,
    /// `false` makes the device read requests without answering them.
    pub respond: bool,
    /// Corrupt every `n`th outgoing frame.  0 disables.
    pub corrupt_every: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7700)),
            event_interval: Duration::from_secs(1),
            temperature_threshold: 75.0,
            respond: true,
            corrupt_every: 0,
        }
    }
}

/// Errors starting the simulator.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to bind simulator listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// Fault switches read by every connection task on each frame.
#[derive(Debug)]
struct Faults {
    respond: AtomicBool,
    corrupt_every: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Disconnect,
}

#[derive(Debug)]
struct Shared {
    faults: Faults,
    event_interval: Duration,
    temperature_threshold: f32,
    connections: AtomicUsize,
    accepted: AtomicUsize,
    control: broadcast::Sender<Control>,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Control surface of a running simulator.
///
/// Dropping the handle does not stop the simulator; call
/// [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct SimulatorHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
}

impl SimulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_respond(&self, respond: bool) {
        self.shared.faults.respond.store(respond, Ordering::SeqCst);
    }

    pub fn set_corrupt_every(&self, n: u32) {
        self.shared.faults.corrupt_every.store(n, Ordering::SeqCst);
    }

    /// Number of connections currently open.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Number of connections accepted since start.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Closes every open connection.  The listener keeps accepting.
    pub fn disconnect_all(&self) {
        // No receivers simply means no open connections.
        let _ = self.shared.control.send(Control::Disconnect);
    }

    /// Stops accepting, closes every connection, and waits for the accept
    /// loop to exit.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        self.disconnect_all();
        if let Err(e) = self.accept_task.await {
            error!("simulator accept loop ended abnormally: {e}");
        }
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Binds `config.bind` and starts serving on a background task.
///
/// # Errors
///
/// Returns [`SimError::Bind`] when the address cannot be bound.
pub async fn spawn(config: SimulatorConfig) -> Result<SimulatorHandle, SimError> {
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|source| SimError::Bind {
            addr: config.bind,
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| SimError::Bind {
        addr: config.bind,
        source,
    })?;
    info!("device simulator listening on {local_addr}");

    let (control, _) = broadcast::channel(8);
    let shared = Arc::new(Shared {
        faults: Faults {
            respond: AtomicBool::new(config.respond),
            corrupt_every: AtomicU32::new(config.corrupt_every),
        },
        event_interval: config.event_interval,
        temperature_threshold: config.temperature_threshold,
        connections: AtomicUsize::new(0),
        accepted: AtomicUsize::new(0),
        control,
    });
    let running = Arc::new(AtomicBool::new(true));

    let accept_task = tokio::spawn(accept_loop(
        listener,
        Arc::clone(&shared),
        Arc::clone(&running),
    ));

    Ok(SimulatorHandle {
        local_addr,
        shared,
        running,
        accept_task,
    })
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::SeqCst) {
            info!("simulator shutting down; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                info!("gateway connected from {peer}");
                let control = shared.control.subscribe();
                shared.accepted.fetch_add(1, Ordering::SeqCst);
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    match serve_connection(stream, &shared, control).await {
                        Ok(()) => info!("connection {peer} closed"),
                        Err(e) => warn!("connection {peer} closed with error: {e}"),
                    }
                    shared.connections.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

// ── Per-connection task ───────────────────────────────────────────────────────

/// Ticks `interval` when there is one, otherwise never completes.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    shared: &Shared,
    mut control: broadcast::Receiver<Control>,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let mut device = SimulatedDevice::new(shared.temperature_threshold);
    let mut parser = FrameParser::new();
    let mut frames_written: u64 = 0;
    let mut buf = [0u8; 1024];

    let mut events = (!shared.event_interval.is_zero()).then(|| {
        let period = shared.event_interval;
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        let outgoing = tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                let requests = parser.feed(&buf[..n]);
                if !shared.faults.respond.load(Ordering::SeqCst) {
                    debug!(dropped = requests.len(), "silent mode, not answering");
                    continue;
                }
                requests.iter().flat_map(|msg| device.handle(msg)).collect::<Vec<_>>()
            }
            _ = next_tick(&mut events) => {
                if !shared.faults.respond.load(Ordering::SeqCst) {
                    continue;
                }
                device.tick()
            }
            signal = control.recv() => match signal {
                Ok(Control::Disconnect) | Err(broadcast::error::RecvError::Closed) => {
                    debug!("disconnect requested");
                    return Ok(());
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            },
        };

        for msg in outgoing {
            frames_written += 1;
            let corrupt_every = shared.faults.corrupt_every.load(Ordering::SeqCst);
            let corrupt = corrupt_every > 0 && frames_written % u64::from(corrupt_every) == 0;
            write_frame(&mut stream, &msg, corrupt).await?;
        }
    }
}

async fn write_frame(stream: &mut TcpStream, msg: &Message, corrupt: bool) -> std::io::Result<()> {
    let mut frame = match build_frame(msg) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(message_type = ?msg.message_type, "could not frame reply: {e}");
            return Ok(());
        }
    };
    if corrupt {
        if let Some(last) = frame.last_mut() {
            *last ^= 0xFF;
        }
        debug!(message_type = ?msg.message_type, sequence = msg.sequence, "corrupting frame");
    }
    stream.write_all(&frame).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
