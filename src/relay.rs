//! Producer-side link to the aggregator.
//!
//! A single background task owns the connection. It connects, pumps queued
//! lines to the peer until the connection fails, then waits a fixed backoff
//! and connects again, forever, until every [`RelayLink`] handle is dropped.
//!
//! Delivery is at-most-once. [`RelayLink::publish`] never blocks: while the
//! link is down it returns [`LinkError::TransientLinkFailure`] and the message
//! is not kept. When a connection fails, only the message whose write failed
//! is lost; it is logged and counted, never retried. Messages still queued
//! behind it are written on the next connection, in order, exactly once.

use crate::config::RelayConfig;
use crate::protocol::{encode_line, ProtocolError, TelemetryMessage};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientCause {
    Disconnected,
    BufferFull,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Retryable: the link recovers on its own through reconnection.
    #[error("relay link temporarily unavailable ({0:?})")]
    TransientLinkFailure(TransientCause),
    #[error("relay link is shut down")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] ProtocolError),
}

impl LinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LinkError::TransientLinkFailure(_))
    }
}

/// Anything that accepts telemetry for delivery.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, message: &TelemetryMessage) -> Result<(), LinkError>;
}

/// Opens a fresh duplex stream to the aggregator.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let address = self.address.clone();
        async move {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub connected: bool,
    /// Successful connections so far; the current epoch when connected.
    pub epoch: u64,
    pub connect_failures: u64,
    pub sent: u64,
    pub lost_in_flight: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct LinkShared {
    connected: AtomicBool,
    epoch: AtomicU64,
    connect_failures: AtomicU64,
    sent: AtomicU64,
    lost_in_flight: AtomicU64,
    rejected: AtomicU64,
}

/// Cloneable handle for publishing over the link.
#[derive(Debug, Clone)]
pub struct RelayLink {
    shared: Arc<LinkShared>,
    outbound: mpsc::Sender<String>,
}

impl RelayLink {
    /// Start the connection task. The task ends once every handle is dropped.
    pub fn spawn<C: Connector>(connector: C, config: &RelayConfig) -> (Self, JoinHandle<()>) {
        let (outbound, queue) = mpsc::channel(config.buffer_capacity.max(1));
        let shared = Arc::new(LinkShared::default());
        let task = tokio::spawn(run_link(connector, config.backoff(), queue, Arc::clone(&shared)));
        (Self { shared, outbound }, task)
    }

    /// Queue one line for delivery without waiting.
    pub fn publish_line(&self, line: String) -> Result<(), LinkError> {
        if !self.shared.connected.load(Ordering::Acquire) {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(LinkError::TransientLinkFailure(TransientCause::Disconnected));
        }

        match self.outbound.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                Err(LinkError::TransientLinkFailure(TransientCause::BufferFull))
            }
            Err(TrySendError::Closed(_)) => Err(LinkError::Closed),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            connected: self.is_connected(),
            epoch: self.shared.epoch.load(Ordering::Relaxed),
            connect_failures: self.shared.connect_failures.load(Ordering::Relaxed),
            sent: self.shared.sent.load(Ordering::Relaxed),
            lost_in_flight: self.shared.lost_in_flight.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}

impl TelemetrySink for RelayLink {
    fn publish(&self, message: &TelemetryMessage) -> Result<(), LinkError> {
        let line = encode_line(message)?;
        self.publish_line(line)
    }
}

enum EpochEnd {
    /// Peer went away or a write failed.
    Disconnected,
    /// All handles dropped; nothing more will be published.
    Shutdown,
}

async fn run_link<C: Connector>(
    connector: C,
    backoff: Duration,
    mut queue: mpsc::Receiver<String>,
    shared: Arc<LinkShared>,
) {
    loop {
        match connector.connect().await {
            Ok(stream) => {
                let epoch = shared.epoch.fetch_add(1, Ordering::Relaxed) + 1;
                shared.connected.store(true, Ordering::Release);
                info!("relay link up (epoch {})", epoch);

                let end = pump(stream, &mut queue, &shared).await;
                shared.connected.store(false, Ordering::Release);

                match end {
                    EpochEnd::Shutdown => {
                        info!("relay link shut down (epoch {})", epoch);
                        return;
                    }
                    EpochEnd::Disconnected => warn!("relay link lost (epoch {}), retrying in {:?}", epoch, backoff),
                }
            }
            Err(e) => {
                shared.connect_failures.fetch_add(1, Ordering::Relaxed);
                warn!("relay connect failed: {}, retrying in {:?}", e, backoff);
            }
        }

        if queue.is_closed() && queue.is_empty() {
            debug!("relay link has no publishers left");
            return;
        }
        tokio::time::sleep(backoff).await;
    }
}

async fn pump<S>(stream: S, queue: &mut mpsc::Receiver<String>, shared: &LinkShared) -> EpochEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut scratch = [0u8; 256];

    loop {
        tokio::select! {
            line = queue.recv() => {
                let Some(line) = line else {
                    let _ = writer.shutdown().await;
                    return EpochEnd::Shutdown;
                };
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    shared.lost_in_flight.fetch_add(1, Ordering::Relaxed);
                    warn!("relay write failed, in-flight message lost: {}", e);
                    return EpochEnd::Disconnected;
                }
                shared.sent.fetch_add(1, Ordering::Relaxed);
            }
            read = reader.read(&mut scratch) => {
                match read {
                    Ok(0) => return EpochEnd::Disconnected,
                    // The aggregator does not talk back on this link; ignore stray bytes
                    Ok(_) => {}
                    Err(e) => {
                        debug!("relay read error: {}", e);
                        return EpochEnd::Disconnected;
                    }
                }
            }
        }
    }
}
