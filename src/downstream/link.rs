//! Seams between an exchange and its backend connection.
//!
//! The bridge never touches sockets. It asks a [`BackendConnector`] for a
//! [`BackendLink`] per exchange, pushes request bytes into it, and receives
//! [`BackendEvent`]s tagged with the [`ExchangeId`] from its driver.

use bytes::Bytes;

/// Identifier of an exchange, unique and increasing within one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl ExchangeId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ex-{}", self.0)
    }
}

/// Lifecycle events of a backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The TCP connection is established.
    Connected,
    /// Bytes read from the backend.
    Data(Bytes),
    /// The backend closed its side.
    Eof,
    /// Connect, read or write failure.
    Error(String),
    /// Connect or idle-read timeout.
    Timeout,
}

/// Write half of one backend connection. Dropping it closes the connection.
pub trait BackendLink: Send {
    /// Queue bytes for the backend. Failures surface later as a [`BackendEvent`].
    fn send(&mut self, data: Bytes);

    /// Stop reading from the backend until [`resume_reading`](Self::resume_reading).
    /// A read already in flight may still be delivered.
    fn pause_reading(&mut self);

    fn resume_reading(&mut self);
}

/// Opens backend connections on behalf of a client connection.
pub trait BackendConnector: Send {
    /// Authority used for the `Host` header when the client sent none.
    fn authority(&self) -> &str;

    /// Start connecting; events for `id` arrive through the driver.
    fn connect(&mut self, id: ExchangeId) -> Box<dyn BackendLink>;
}

#[cfg(test)]
pub mod mock {
    //! In-memory connector recording everything sent to each exchange.

    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::{BackendConnector, BackendLink, ExchangeId};

    #[derive(Debug, Default)]
    pub struct Recorded {
        pub connects: Vec<ExchangeId>,
        pub sent: BTreeMap<ExchangeId, Vec<u8>>,
        pub dropped: Vec<ExchangeId>,
        pub paused: BTreeSet<ExchangeId>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockConnector {
        pub recorded: Arc<Mutex<Recorded>>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_to(&self, id: ExchangeId) -> String {
            let recorded = self.recorded.lock().unwrap();
            recorded
                .sent
                .get(&id)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default()
        }

        pub fn connects(&self) -> Vec<ExchangeId> {
            self.recorded.lock().unwrap().connects.clone()
        }

        pub fn dropped(&self) -> Vec<ExchangeId> {
            self.recorded.lock().unwrap().dropped.clone()
        }

        pub fn is_paused(&self, id: ExchangeId) -> bool {
            self.recorded.lock().unwrap().paused.contains(&id)
        }
    }

    struct MockLink {
        id: ExchangeId,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl BackendLink for MockLink {
        fn send(&mut self, data: Bytes) {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.sent.entry(self.id).or_default().extend_from_slice(&data);
        }

        fn pause_reading(&mut self) {
            self.recorded.lock().unwrap().paused.insert(self.id);
        }

        fn resume_reading(&mut self) {
            self.recorded.lock().unwrap().paused.remove(&self.id);
        }
    }

    impl Drop for MockLink {
        fn drop(&mut self) {
            if let Ok(mut recorded) = self.recorded.lock() {
                recorded.dropped.push(self.id);
            }
        }
    }

    impl BackendConnector for MockConnector {
        fn authority(&self) -> &str {
            "backend.test:8080"
        }

        fn connect(&mut self, id: ExchangeId) -> Box<dyn BackendLink> {
            self.recorded.lock().unwrap().connects.push(id);
            Box::new(MockLink {
                id,
                recorded: Arc::clone(&self.recorded),
            })
        }
    }
}
