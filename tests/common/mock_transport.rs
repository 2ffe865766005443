// tests/common/mock_transport.rs
//! In-memory connector and sockets for driving `Connection` in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use trainwatch_lib::stream::{Connector, Socket, TransportError};

/// A connector that records every attempt and hands the server side of each
/// accepted socket to the test as a [`MockPeer`].
pub struct MockConnector {
    refuse: AtomicBool,
    attempts: Mutex<Vec<(String, Instant)>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
}

impl MockConnector {
    /// Accepts every connection.
    pub fn accepting() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            refuse: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        }
    }

    /// Refuses every connection until [`MockConnector::set_refuse`] flips it.
    pub fn refusing() -> Self {
        let connector = Self::accepting();
        connector.set_refuse(true);
        connector
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connect calls so far.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Time of each connect call, relative to `start`, in whole seconds.
    pub fn attempt_offsets(&self, start: Instant) -> Vec<u64> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| at.duration_since(start).as_secs())
            .collect()
    }

    pub fn attempted_urls(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Wait for the next accepted socket.
    pub async fn next_peer(&self) -> MockPeer {
        let mut peers = self.peers_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), peers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        self.attempts
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("connection refused".to_string()));
        }

        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
        let _ = self.peers_tx.send(MockPeer {
            url: url.to_string(),
            to_client: Some(to_client_tx),
            from_client: from_client_rx,
        });
        Ok(Box::new(MockSocket {
            incoming: to_client_rx,
            outgoing: from_client_tx,
        }))
    }
}

/// Server side of one mock socket. Dropping it (or calling
/// [`MockPeer::hang_up`]) closes the socket from the server's end.
pub struct MockPeer {
    pub url: String,
    to_client: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    /// Push one text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(text.into()));
        }
    }

    /// Push one frame the client cannot read, such as non-UTF-8 binary.
    pub fn push_unreadable(&self, reason: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Err(TransportError::InvalidFrame(reason.to_string())));
        }
    }

    /// Next frame the client sent, if any arrives within a second.
    pub async fn received(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(1), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Close the server side; the client sees end-of-stream.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }
}

struct MockSocket {
    incoming: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.incoming.recv().await
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.incoming.close();
        Ok(())
    }
}
