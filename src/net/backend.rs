//! Backend connections over TCP.
//!
//! # Responsibilities
//! - Connect to the backend with a timeout
//! - Write request bytes queued by the exchange
//! - Read response bytes with an idle timeout
//! - Report everything to the client task as [`BackendEvent`]s
//!
//! # Design Decisions
//! - One task per backend connection; it never touches bridge state
//! - Dropping the [`BackendLink`] aborts the task and closes the socket
//! - A paused link stops reading; the idle timer only runs while reading

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::downstream::{BackendConnector, BackendEvent, BackendLink, ExchangeId};

const READ_BUFFER: usize = 16 * 1024;

/// Channel carrying backend events to the owning client task.
pub type EventSender = mpsc::UnboundedSender<(ExchangeId, BackendEvent)>;

/// Opens one TCP connection per exchange to the configured backend.
pub struct TcpConnector {
    authority: Arc<str>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    events: EventSender,
}

impl TcpConnector {
    pub fn new(config: &ProxyConfig, events: EventSender) -> Self {
        Self {
            authority: Arc::from(config.backend.address.as_str()),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
            events,
        }
    }
}

impl BackendConnector for TcpConnector {
    fn authority(&self) -> &str {
        &self.authority
    }

    fn connect(&mut self, id: ExchangeId) -> Box<dyn BackendLink> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (paused_tx, paused_rx) = watch::channel(false);
        let task = tokio::spawn(run_backend(
            id,
            Arc::clone(&self.authority),
            self.connect_timeout,
            self.idle_timeout,
            outbound_rx,
            paused_rx,
            self.events.clone(),
        ));
        Box::new(TcpLink {
            outbound: outbound_tx,
            paused: paused_tx,
            task,
        })
    }
}

struct TcpLink {
    outbound: mpsc::UnboundedSender<Bytes>,
    paused: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackendLink for TcpLink {
    fn send(&mut self, data: Bytes) {
        // A closed channel means the task already reported its failure.
        let _ = self.outbound.send(data);
    }

    fn pause_reading(&mut self) {
        self.paused.send_replace(true);
    }

    fn resume_reading(&mut self) {
        self.paused.send_replace(false);
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_backend(
    id: ExchangeId,
    authority: Arc<str>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    mut paused: watch::Receiver<bool>,
    events: EventSender,
) {
    let emit = |event: BackendEvent| {
        let _ = events.send((id, event));
    };

    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&*authority)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!(exchange_id = %id, backend = %authority, error = %e, "Backend connect failed");
            emit(BackendEvent::Error(e.to_string()));
            return;
        }
        Err(_) => {
            tracing::debug!(exchange_id = %id, backend = %authority, "Backend connect timed out");
            emit(BackendEvent::Timeout);
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    emit(BackendEvent::Connected);

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    let mut outbound_open = true;

    loop {
        let reading = !*paused.borrow_and_update();
        tokio::select! {
            data = outbound.recv(), if outbound_open => match data {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        emit(BackendEvent::Error(e.to_string()));
                        return;
                    }
                }
                None => outbound_open = false,
            },
            changed = paused.changed(), if !reading => {
                if changed.is_err() {
                    return;
                }
            }
            read = tokio::time::timeout(idle_timeout, reader.read_buf(&mut buf)), if reading => match read {
                Ok(Ok(0)) => {
                    emit(BackendEvent::Eof);
                    return;
                }
                Ok(Ok(_)) => emit(BackendEvent::Data(buf.split().freeze())),
                Ok(Err(e)) => {
                    emit(BackendEvent::Error(e.to_string()));
                    return;
                }
                Err(_) => {
                    tracing::debug!(exchange_id = %id, idle_secs = idle_timeout.as_secs(), "Backend idle timeout");
                    emit(BackendEvent::Timeout);
                    return;
                }
            },
        }
        if buf.capacity() < READ_BUFFER / 4 {
            buf.reserve(READ_BUFFER);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config_for(address: String, idle_secs: u64) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backend.address = address;
        config.timeouts.connect_secs = 1;
        config.timeouts.idle_secs = idle_secs;
        config
    }

    #[tokio::test]
    async fn test_round_trip_reports_data_then_eof() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = backend.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = backend.accept().await.unwrap();
            let mut request = vec![0u8; 5];
            socket.read_exact(&mut request).await.unwrap();
            assert_eq!(&request, b"hello");
            socket.write_all(b"world").await.unwrap();
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = TcpConnector::new(&config_for(addr.to_string(), 5), tx);
        let mut link = connector.connect(ExchangeId::new(1));
        link.send(Bytes::from_static(b"hello"));

        assert_eq!(rx.recv().await.unwrap(), (ExchangeId::new(1), BackendEvent::Connected));
        let mut body = Vec::new();
        loop {
            match rx.recv().await.unwrap().1 {
                BackendEvent::Data(bytes) => body.extend_from_slice(&bytes),
                BackendEvent::Eof => break,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(body, b"world");
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = unused.local_addr().unwrap();
        drop(unused);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = TcpConnector::new(&config_for(addr.to_string(), 5), tx);
        let _link = connector.connect(ExchangeId::new(3));

        let (id, event) = rx.recv().await.unwrap();
        assert_eq!(id, ExchangeId::new(3));
        assert!(matches!(event, BackendEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = backend.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = backend.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = TcpConnector::new(&config_for(addr.to_string(), 1), tx);
        let _link = connector.connect(ExchangeId::new(1));

        assert_eq!(rx.recv().await.unwrap().1, BackendEvent::Connected);
        assert_eq!(rx.recv().await.unwrap().1, BackendEvent::Timeout);
    }

    #[tokio::test]
    async fn test_paused_link_holds_data_without_timing_out() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = backend.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = backend.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = TcpConnector::new(&config_for(addr.to_string(), 1), tx);
        let mut link = connector.connect(ExchangeId::new(1));
        link.pause_reading();

        assert_eq!(rx.recv().await.unwrap().1, BackendEvent::Connected);
        assert!(tokio::time::timeout(Duration::from_millis(1500), rx.recv())
            .await
            .is_err());

        link.resume_reading();
        assert_eq!(
            rx.recv().await.unwrap().1,
            BackendEvent::Data(Bytes::from_static(b"hello"))
        );
    }
}
