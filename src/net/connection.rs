//! Client connection bookkeeping.
//!
//! # Responsibilities
//! - Unique connection IDs for tracing
//! - Count live connections so shutdown can wait for them
//! - Buffer client bytes in both directions ([`ClientBuffer`])

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::sync::Notify;

/// Relaxed ordering is enough: the counter only has to hand out unique values.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts live client connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    idle: Notify,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The returned guard releases it on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        crate::observability::metrics::set_active_connections(active);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection has closed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps a connection counted while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        crate::observability::metrics::set_active_connections(active);
        if active == 0 {
            self.inner.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Bytes buffered for one client connection, plus its read/close flags.
///
/// The network driver appends socket reads to the input and flushes the
/// output; the protocol bridge consumes input and appends output.
#[derive(Debug)]
pub struct ClientBuffer {
    input: BytesMut,
    output: BytesMut,
    read_enabled: bool,
    close_after_write: bool,
}

impl Default for ClientBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuffer {
    pub fn new() -> Self {
        Self {
            input: BytesMut::with_capacity(8 * 1024),
            output: BytesMut::with_capacity(8 * 1024),
            read_enabled: true,
            close_after_write: false,
        }
    }

    /// Unconsumed client bytes.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Append bytes read from the socket.
    pub fn push_input(&mut self, data: &[u8]) {
        self.input.extend_from_slice(data);
    }

    /// Discard the first `n` input bytes.
    pub fn drain_input(&mut self, n: usize) {
        self.input.advance(n.min(self.input.len()));
    }

    /// Queue bytes for the client.
    pub fn write(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Take everything queued for the client.
    pub fn take_output(&mut self) -> BytesMut {
        self.output.split()
    }

    pub fn read_enabled(&self) -> bool {
        self.read_enabled
    }

    pub fn enable_read(&mut self) {
        self.read_enabled = true;
    }

    pub fn disable_read(&mut self) {
        self.read_enabled = false;
    }

    /// Close the connection once queued output is flushed.
    pub fn set_close_after_write(&mut self) {
        self.close_after_write = true;
    }

    pub fn close_after_write(&self) -> bool {
        self.close_after_write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_after_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[test]
    fn test_client_buffer_drains_prefix() {
        let mut client = ClientBuffer::new();
        client.push_input(b"GET / HTTP/1.1\r\n\r\nrest");
        client.drain_input(18);
        assert_eq!(client.input(), b"rest");
        client.drain_input(100);
        assert!(client.input().is_empty());
    }

    #[test]
    fn test_client_buffer_output_and_flags() {
        let mut client = ClientBuffer::new();
        assert!(client.read_enabled());
        client.write(b"HTTP/1.1 200 OK\r\n");
        client.write(b"\r\n");
        assert!(client.has_pending_output());
        assert_eq!(&client.take_output()[..], b"HTTP/1.1 200 OK\r\n\r\n");
        assert!(!client.has_pending_output());

        client.disable_read();
        assert!(!client.read_enabled());
        client.set_close_after_write();
        assert!(client.close_after_write());
    }
}
