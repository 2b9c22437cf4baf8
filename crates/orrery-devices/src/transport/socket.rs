//! TCP connection to an INDI server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use orrery_core::utils::with_timeout;

use crate::error::{DeviceError, Result};
use crate::protocol::{encode, IndiMessage, IndiReader};
use crate::transport::Connection;

/// Default INDI server port
pub const DEFAULT_PORT: u16 = 7624;

/// TCP connection to an INDI server
pub struct SocketConnection {
    peer: String,
    reader: Mutex<IndiReader<BufReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    open: AtomicBool,
    token: CancellationToken,
}

impl SocketConnection {
    /// Connect to `host:port`, failing after `timeout`
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        debug!("Connecting to INDI server at {}", peer);

        let stream: TcpStream = with_timeout(timeout, async {
            TcpStream::connect((host, port)).await.map_err(DeviceError::from)
        })
        .await?;
        stream.set_nodelay(true)?;

        info!("Connected to INDI server at {}", peer);
        Ok(Self::from_stream(peer, stream))
    }

    /// Wrap an established stream
    pub fn from_stream(peer: String, stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer,
            reader: Mutex::new(IndiReader::new(BufReader::new(read_half))),
            writer: Mutex::new(Some(write_half)),
            open: AtomicBool::new(true),
            token: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Connection for SocketConnection {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn read(&self) -> Option<IndiMessage> {
        if !self.is_open() {
            return None;
        }

        let result = {
            let mut reader = self.reader.lock().await;
            tokio::select! {
                _ = self.token.cancelled() => return None,
                result = reader.next_message() => result,
            }
        };

        match result {
            Ok(Some(message)) => Some(message),
            Ok(None) => {
                debug!(peer = %self.peer, "INDI server closed the stream");
                self.close().await;
                None
            }
            Err(e) => {
                warn!(peer = %self.peer, "INDI socket read failed: {}", e);
                self.close().await;
                None
            }
        }
    }

    async fn write(&self, message: &IndiMessage) -> Result<()> {
        let bytes = encode(message)?;
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(DeviceError::ConnectionClosed)?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(peer = %self.peer, "Closing INDI socket");
            self.token.cancel();
            if let Some(mut stream) = self.writer.lock().await.take() {
                let _ = stream.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use crate::protocol::{GetProperties, PropertyState};

    #[tokio::test]
    async fn test_reads_frames_and_writes_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(
                    br#"<defSwitchVector device="CCD" name="CONNECTION" state="Idle" perm="rw"
                          rule="OneOfMany">
                          <defSwitch name="CONNECT">Off</defSwitch>
                          <defSwitch name="DISCONNECT">On</defSwitch>
                        </defSwitchVector>
                        <setSwitchVector device="CCD" name="CONNECTION" state="Bad">
                          <oneSwitch name="CONNECT">On</oneSwitch>
                        </setSwitchVector>
                        <setSwitchVector device="CCD" name="CONNECTION" state="Ok">
                          <oneSwitch name="CONNECT">On</oneSwitch>
                        </setSwitchVector>"#,
                )
                .await
                .unwrap();

            let mut received = vec![0u8; 64];
            let n = socket.read(&mut received).await.unwrap();
            String::from_utf8_lossy(&received[..n]).into_owned()
        });

        let connection = SocketConnection::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();

        let first = connection.read().await.unwrap();
        assert!(first.as_vector().unwrap().is_def());
        let second = connection.read().await.unwrap();
        assert_eq!(second.as_vector().unwrap().state, PropertyState::Ok);

        connection
            .write(&IndiMessage::GetProperties(GetProperties::default()))
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), "<getProperties version=\"1.7\"/>\n");

        assert_eq!(connection.read().await, None);
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let connection = Arc::new(
            SocketConnection::connect("127.0.0.1", port, Duration::from_secs(2))
                .await
                .unwrap(),
        );
        let reader = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.read().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        connection.close().await;
        connection.close().await;

        assert_eq!(reader.await.unwrap(), None);
        let query = IndiMessage::GetProperties(GetProperties::default());
        assert!(connection.write(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = SocketConnection::connect("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
