//! TCP ingest: one frame per connection.

use super::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::frame::{FrameParser, ParseError, SensorFrame};
use crate::mode::{Mode, ModeHandle};
use crate::queue::DurableQueue;
use crate::shutdown::Shutdown;
use crate::uplink::UplinkClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Appended to the durable queue (normal mode)
    Queued,
    /// Delivered straight to the uplink (debug mode)
    Sent,
    /// Debug mode send was not acknowledged; the frame is lost
    SendFailed,
    /// Rejected by the frame grammar
    Dropped(ParseError),
    /// The queue could not store the frame; the frame is lost
    StorageFailed,
    /// The connection failed before a full payload arrived
    ReadFailed,
}

/// Accepts sensor node connections and routes their frames by mode.
pub struct IngestListener {
    listener: TcpListener,
    parser: FrameParser,
    read_timeout: Duration,
    queue: Arc<DurableQueue>,
    uplink: Arc<dyn UplinkClient>,
    mode: ModeHandle,
}

impl IngestListener {
    /// Bind the listening socket. Failure here is a fatal startup error.
    pub async fn bind(
        config: &RelayConfig,
        queue: Arc<DurableQueue>,
        uplink: Arc<dyn UplinkClient>,
        mode: ModeHandle,
    ) -> Result<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::config_error(format!("Failed to bind ingest listener to {}: {}", addr, e))
        })?;

        Ok(Self {
            listener,
            parser: FrameParser::new(config.max_frame_bytes),
            read_timeout: config.read_timeout,
            queue,
            uplink,
            mode,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown. Per-connection errors never end the loop.
    pub async fn run(self, mut shutdown: Shutdown) {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "Ingest listener waiting for frames"),
            Err(e) => warn!("Ingest listener started, address unknown: {}", e),
        }

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.wait() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Connection accepted");
                    self.serve_connection(stream, peer).await;
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    // Avoid spinning when the process is out of descriptors.
                    if !shutdown.sleep(Duration::from_millis(100)).await {
                        break;
                    }
                }
            }
        }

        info!("Ingest listener stopped");
    }

    /// Read one payload from `stream`, handle it, and close the connection.
    pub async fn serve_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> IngestOutcome {
        let mut payload = Vec::new();
        // One byte over the limit is enough to tell an oversized frame apart.
        let limit = self.parser.max_frame_bytes() as u64 + 1;
        let read = tokio::time::timeout(
            self.read_timeout,
            (&mut stream).take(limit).read_to_end(&mut payload),
        )
        .await;

        match read {
            Ok(Ok(_)) => self.ingest(&payload).await,
            Ok(Err(e)) => {
                warn!(%peer, "Failed to read frame: {}", e);
                IngestOutcome::ReadFailed
            }
            Err(_) => {
                warn!(%peer, timeout = ?self.read_timeout, "Timed out reading frame");
                IngestOutcome::ReadFailed
            }
        }
    }

    /// Parse a payload and route it by the current mode.
    pub async fn ingest(&self, payload: &[u8]) -> IngestOutcome {
        let frame = match self.parser.parse_bytes(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return IngestOutcome::Dropped(e);
            }
        };

        match self.mode.current() {
            Mode::Debug => self.send_now(&frame).await,
            Mode::Normal => self.enqueue(&frame).await,
        }
    }

    async fn send_now(&self, frame: &SensorFrame) -> IngestOutcome {
        let line = match frame.to_record().to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(source_id = %frame.source_id(), "Failed to encode frame: {}", e);
                return IngestOutcome::SendFailed;
            }
        };

        if self.uplink.send(&line).await {
            info!(source_id = %frame.source_id(), "Frame sent directly (debug mode)");
            IngestOutcome::Sent
        } else {
            warn!(source_id = %frame.source_id(), frame = %line, "Direct send failed (debug mode)");
            IngestOutcome::SendFailed
        }
    }

    async fn enqueue(&self, frame: &SensorFrame) -> IngestOutcome {
        match self.queue.append(frame).await {
            Ok(()) => {
                info!(source_id = %frame.source_id(), "Frame queued");
                IngestOutcome::Queued
            }
            Err(e) => {
                error!(source_id = %frame.source_id(), frame = %frame.to_wire(), "Failed to queue frame: {}", e);
                IngestOutcome::StorageFailed
            }
        }
    }
}
