/*!
 * Transports carrying INDI messages.
 *
 * Every transport implements [`Connection`]: a bidirectional stream of
 * [`IndiMessage`]s with an idempotent [`Connection::close`] that unblocks a
 * pending read. A connection has exactly one reader; writes go through
 * [`CommandSender`], which funnels every command of a connection into a
 * single writer task so frames are never interleaved.
 */
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use orrery_core::logging::device_span;
use orrery_core::utils::spawn_and_log;

use crate::error::{DeviceError, Result};
use crate::protocol::IndiMessage;

pub mod piped;
pub mod process;
pub mod socket;

pub use piped::{PipedConnection, PipedDriver};
pub use process::ProcessConnection;
pub use socket::SocketConnection;

/// A bidirectional INDI message stream
#[async_trait]
pub trait Connection: Send + Sync {
    /// Human readable peer description, used in logs
    fn peer(&self) -> &str;

    /// Read the next message; `None` once the stream has ended or was closed
    async fn read(&self) -> Option<IndiMessage>;

    /// Write and flush one message
    async fn write(&self, message: &IndiMessage) -> Result<()>;

    /// Whether the connection is still open
    fn is_open(&self) -> bool;

    /// Close the connection. Safe to call any number of times.
    async fn close(&self);
}

/// Shared handle to a connection
pub type SharedConnection = Arc<dyn Connection>;

/// Fire-and-forget command queue feeding a connection's writer task
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<IndiMessage>,
}

impl CommandSender {
    /// Create a sender together with the receiving end of its queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IndiMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message; dropped silently once the writer has stopped
    pub fn send(&self, message: IndiMessage) {
        if self.tx.send(message).is_err() {
            debug!("Dropping INDI command, connection writer has stopped");
        }
    }

    /// Whether the writer is still accepting messages
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn the single writer task of a connection
pub fn spawn_writer(connection: SharedConnection) -> (CommandSender, JoinHandle<()>) {
    let (sender, mut rx) = CommandSender::channel();

    let span = device_span("writer", connection.peer());
    let handle = spawn_and_log(
        "indi-writer",
        async move {
            while let Some(message) = rx.recv().await {
                connection.write(&message).await?;
            }
            debug!("INDI writer stopped");
            Ok::<_, DeviceError>(())
        }
        .instrument(span),
    );

    (sender, handle)
}
