//! In-memory connection for simulated drivers and tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DeviceError, Result};
use crate::protocol::IndiMessage;
use crate::transport::Connection;

/// Client end of an in-memory INDI link
#[derive(Debug)]
pub struct PipedConnection {
    name: String,
    incoming: Mutex<mpsc::UnboundedReceiver<IndiMessage>>,
    outgoing: mpsc::UnboundedSender<IndiMessage>,
    open: AtomicBool,
    token: CancellationToken,
}

/// Driver end of an in-memory INDI link
///
/// Dropping it ends the client's stream.
#[derive(Debug)]
pub struct PipedDriver {
    to_client: mpsc::UnboundedSender<IndiMessage>,
    from_client: mpsc::UnboundedReceiver<IndiMessage>,
}

impl PipedConnection {
    /// Create a connected client/driver pair
    pub fn pair<S: Into<String>>(name: S) -> (PipedConnection, PipedDriver) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();

        let connection = PipedConnection {
            name: name.into(),
            incoming: Mutex::new(incoming),
            outgoing,
            open: AtomicBool::new(true),
            token: CancellationToken::new(),
        };

        (connection, PipedDriver { to_client, from_client })
    }
}

#[async_trait]
impl Connection for PipedConnection {
    fn peer(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Option<IndiMessage> {
        if !self.is_open() {
            return None;
        }

        let mut incoming = self.incoming.lock().await;

        tokio::select! {
            _ = self.token.cancelled() => None,
            message = incoming.recv() => message,
        }
    }

    async fn write(&self, message: &IndiMessage) -> Result<()> {
        if !self.is_open() {
            return Err(DeviceError::ConnectionClosed);
        }
        self.outgoing
            .send(message.clone())
            .map_err(|_| DeviceError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(peer = %self.name, "Closing piped connection");
            self.token.cancel();
            self.incoming.lock().await.close();
        }
    }
}

impl PipedDriver {
    /// Send a message to the client; `false` once the client end is gone
    pub fn send<M: Into<IndiMessage>>(&self, message: M) -> bool {
        self.to_client.send(message.into()).is_ok()
    }

    /// Next command written by the client
    pub async fn recv(&mut self) -> Option<IndiMessage> {
        self.from_client.recv().await
    }

    /// Next command written by the client, without waiting
    pub fn try_recv(&mut self) -> Option<IndiMessage> {
        self.from_client.try_recv().ok()
    }
}
