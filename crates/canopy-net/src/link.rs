//! Coordinator link orchestration with the tokio mpsc command/notification pattern.
//!
//! The connection loop runs in a dedicated tokio task. The client talks to it
//! through a [`LinkHandle`] (commands in) and a notification receiver (events
//! out), so the protocol handlers never touch the socket directly.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use canopy_shared::constants::DEFAULT_COORDINATOR_PORT;
use canopy_shared::protocol::Envelope;

use crate::error::LinkError;
use crate::framing::{decode_frame, encode_frame};

/// Envelopes queued while disconnected; older ones are dropped past this.
const MAX_PENDING: usize = 256;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the link task.
#[derive(Debug)]
pub enum LinkCommand {
    /// Write one envelope to the coordinator.
    Send(Envelope),
    /// Drop the current connection as no longer usable and dial a fresh one.
    Reset,
    /// Close the link for good.
    Shutdown,
}

/// Notifications sent *from* the link task to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkNotification {
    /// A connection to the coordinator was (re)established.
    Connected,
    /// The connection went away.
    Disconnected { reason: String },
    /// An envelope arrived from the coordinator.
    Message(Envelope),
}

/// Configuration for spawning the link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// `host:port` of the coordinator.
    pub coordinator_addr: String,
    /// Pause between reconnect attempts and after a reset.
    pub reconnect_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: format!("127.0.0.1:{DEFAULT_COORDINATOR_PORT}"),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

/// Cloneable sender half used to drive the link task.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    cmd_tx: mpsc::Sender<LinkCommand>,
}

impl LinkHandle {
    pub fn new(cmd_tx: mpsc::Sender<LinkCommand>) -> Self {
        Self { cmd_tx }
    }

    pub async fn send(&self, envelope: Envelope) -> Result<(), LinkError> {
        self.cmd_tx
            .send(LinkCommand::Send(envelope))
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }

    pub async fn reset(&self) -> Result<(), LinkError> {
        self.cmd_tx
            .send(LinkCommand::Reset)
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.cmd_tx
            .send(LinkCommand::Shutdown)
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// How a connected session ended.
enum SessionEnd {
    Lost(String),
    Reset,
    Shutdown,
}

/// Spawn the coordinator link in a background tokio task.
///
/// Returns the command handle and the notification receiver. The task keeps
/// reconnecting until [`LinkHandle::shutdown`] is called or every handle is
/// dropped.
pub fn spawn_link(config: LinkConfig) -> (LinkHandle, mpsc::Receiver<LinkNotification>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<LinkCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<LinkNotification>(256);

    tokio::spawn(run_link(config, cmd_rx, notif_tx));

    (LinkHandle::new(cmd_tx), notif_rx)
}

async fn run_link(
    config: LinkConfig,
    mut cmd_rx: mpsc::Receiver<LinkCommand>,
    notif_tx: mpsc::Sender<LinkNotification>,
) {
    let mut pending: VecDeque<Envelope> = VecDeque::new();

    loop {
        let stream = match TcpStream::connect(&config.coordinator_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    addr = %config.coordinator_addr,
                    error = %e,
                    "Coordinator connect failed"
                );
                if !wait_while_disconnected(&config, &mut cmd_rx, &mut pending).await {
                    break;
                }
                continue;
            }
        };

        info!(addr = %config.coordinator_addr, "Coordinator link established");
        let _ = notif_tx.send(LinkNotification::Connected).await;

        match run_session(stream, &mut cmd_rx, &notif_tx, &mut pending).await {
            SessionEnd::Shutdown => {
                info!("Link shutdown requested");
                break;
            }
            SessionEnd::Reset => {
                info!("Link reset, connection marked unusable");
                let _ = notif_tx
                    .send(LinkNotification::Disconnected {
                        reason: "reset".into(),
                    })
                    .await;
            }
            SessionEnd::Lost(reason) => {
                warn!(reason = %reason, "Coordinator link lost");
                let _ = notif_tx
                    .send(LinkNotification::Disconnected { reason })
                    .await;
            }
        }

        if !wait_while_disconnected(&config, &mut cmd_rx, &mut pending).await {
            break;
        }
    }

    info!("Link event loop terminated");
}

/// Sleep out the reconnect delay while still honouring commands.
///
/// Returns `false` when the link should stop.
async fn wait_while_disconnected(
    config: &LinkConfig,
    cmd_rx: &mut mpsc::Receiver<LinkCommand>,
    pending: &mut VecDeque<Envelope>,
) -> bool {
    let delay = tokio::time::sleep(config.reconnect_delay);
    tokio::pin!(delay);

    loop {
        tokio::select! {
            _ = &mut delay => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(LinkCommand::Send(envelope)) => queue_pending(pending, envelope),
                Some(LinkCommand::Reset) => {}
                Some(LinkCommand::Shutdown) | None => return false,
            },
        }
    }
}

async fn run_session(
    stream: TcpStream,
    cmd_rx: &mut mpsc::Receiver<LinkCommand>,
    notif_tx: &mpsc::Sender<LinkNotification>,
    pending: &mut VecDeque<Envelope>,
) -> SessionEnd {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(envelope) = pending.pop_front() {
        if let Err(e) = write_envelope(&mut write_half, &envelope).await {
            pending.push_front(envelope);
            return SessionEnd::Lost(e.to_string());
        }
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(LinkCommand::Send(envelope)) => {
                    if let Err(e) = write_envelope(&mut write_half, &envelope).await {
                        match e {
                            LinkError::Io(_) => {
                                queue_pending(pending, envelope);
                                return SessionEnd::Lost(e.to_string());
                            }
                            other => warn!(kind = %envelope.kind, error = %other, "Dropping unsendable envelope"),
                        }
                    }
                }
                Some(LinkCommand::Reset) => {
                    let _ = write_half.shutdown().await;
                    return SessionEnd::Reset;
                }
                Some(LinkCommand::Shutdown) | None => {
                    let _ = write_half.shutdown().await;
                    return SessionEnd::Shutdown;
                }
            },

            line = lines.next_line() => match line {
                Ok(Some(line)) => match decode_frame(&line) {
                    Ok(Some(envelope)) => {
                        debug!(kind = %envelope.kind, request_id = ?envelope.request_id, "Envelope received");
                        if notif_tx.send(LinkNotification::Message(envelope)).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Discarding malformed frame"),
                },
                Ok(None) => return SessionEnd::Lost("closed by coordinator".into()),
                Err(e) => return SessionEnd::Lost(e.to_string()),
            },
        }
    }
}

async fn write_envelope(writer: &mut OwnedWriteHalf, envelope: &Envelope) -> Result<(), LinkError> {
    let frame = encode_frame(envelope)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    debug!(kind = %envelope.kind, "Envelope sent");
    Ok(())
}

fn queue_pending(pending: &mut VecDeque<Envelope>, envelope: Envelope) {
    if pending.len() >= MAX_PENDING {
        if let Some(dropped) = pending.pop_front() {
            warn!(kind = %dropped.kind, "Pending queue full, dropping oldest envelope");
        }
    }
    pending.push_back(envelope);
}
