//! Per-connection driver.
//!
//! # Data Flow
//! ```text
//! client socket ──read──▶ HttpUpstream::on_read ──▶ backend tasks
//!                                                        │
//! client socket ◀─flush── HttpUpstream::on_backend_event ◀┘ (events channel)
//! ```
//!
//! # Design Decisions
//! - The bridge is owned by this task; backend tasks only send events
//! - Output is flushed after every step, then `close_after_write` is checked
//! - On shutdown, stop reading and finish the exchanges already queued

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::net::backend::TcpConnector;
use crate::net::connection::ConnectionGuard;
use crate::upstream::{HttpUpstream, UpstreamError, UpstreamSettings};

const READ_BUFFER: usize = 16 * 1024;

/// Serve one client connection until it closes.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ProxyConfig>,
    local_port: u16,
    shutdown: broadcast::Receiver<()>,
    guard: ConnectionGuard,
) {
    let span = tracing::info_span!("connection", connection_id = %guard.id(), peer = %peer);
    async move {
        tracing::debug!("Client connected");
        drive(stream, &config, local_port, shutdown).await;
        tracing::debug!("Client disconnected");
        drop(guard);
    }
    .instrument(span)
    .await
}

async fn drive(
    stream: TcpStream,
    config: &ProxyConfig,
    local_port: u16,
    mut shutdown: broadcast::Receiver<()>,
) {
    let _ = stream.set_nodelay(true);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut upstream = HttpUpstream::new(
        Box::new(TcpConnector::new(config, events_tx)),
        UpstreamSettings::from_config(config, local_port),
    );

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    let mut client_eof = false;
    let mut draining = false;

    loop {
        let reading = upstream.client().read_enabled() && !client_eof && !draining;
        let mut fatal = false;

        tokio::select! {
            read = reader.read_buf(&mut buf), if reading => match read {
                Ok(0) => {
                    tracing::debug!(pending = upstream.pending_exchanges(), "Client closed its side");
                    client_eof = true;
                }
                Ok(_) => {
                    upstream.client_mut().push_input(&buf);
                    buf.clear();
                    if let Err(err) = upstream.on_read() {
                        upstream.on_parse_failure();
                        tracing::debug!(error = %err, "Closing connection after parse failure");
                        fatal = true;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Client read failed");
                    return;
                }
            },
            Some((id, event)) = events_rx.recv() => {
                if let Err(err) = upstream.on_backend_event(id, event) {
                    match err {
                        UpstreamError::HttpParse(_) => upstream.on_parse_failure(),
                        UpstreamError::ResponseCorrupted { .. } => {}
                    }
                    tracing::debug!(error = %err, "Tearing down connection");
                    fatal = true;
                }
            }
            _ = shutdown.recv(), if !draining => {
                tracing::debug!(pending = upstream.pending_exchanges(), "Draining connection");
                draining = true;
            }
            else => break,
        }

        if let Err(e) = flush(&mut upstream, &mut writer).await {
            tracing::debug!(error = %e, "Client write failed");
            return;
        }
        if fatal || upstream.client().close_after_write() {
            break;
        }
        if (client_eof || draining) && upstream.pending_exchanges() == 0 {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

async fn flush(upstream: &mut HttpUpstream, writer: &mut OwnedWriteHalf) -> std::io::Result<()> {
    if upstream.client().has_pending_output() {
        let out = upstream.client_mut().take_output();
        writer.write_all(&out).await?;
    }
    Ok(())
}
