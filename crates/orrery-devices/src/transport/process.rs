//! Local INDI driver executable spoken to over its standard streams.

use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DeviceError, Result};
use crate::protocol::{encode, IndiMessage, IndiReader};
use crate::transport::Connection;

/// A spawned driver process; stdout carries frames in, stdin carries commands out
pub struct ProcessConnection {
    driver: String,
    child: Mutex<Child>,
    reader: Mutex<IndiReader<BufReader<ChildStdout>>>,
    writer: Mutex<Option<ChildStdin>>,
    open: AtomicBool,
    token: CancellationToken,
}

impl ProcessConnection {
    /// Spawn `program` with `args`
    ///
    /// Must be called from within a Tokio runtime; the driver's stderr is
    /// forwarded to the log by a background task.
    pub fn spawn<P, I, A>(program: P, args: I) -> Result<Self>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let driver = program.as_ref().to_string_lossy().into_owned();

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::other("driver stdout is not captured"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DeviceError::other("driver stdin is not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            let name = driver.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(driver = %name, "{}", line);
                }
            });
        }

        info!(pid = ?child.id(), "Spawned INDI driver {}", driver);

        Ok(Self {
            driver,
            child: Mutex::new(child),
            reader: Mutex::new(IndiReader::new(BufReader::new(stdout))),
            writer: Mutex::new(Some(stdin)),
            open: AtomicBool::new(true),
            token: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Connection for ProcessConnection {
    fn peer(&self) -> &str {
        &self.driver
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
                debug!(driver = %self.driver, "INDI driver closed its output");
                self.close().await;
                None
            }
            Err(e) => {
                warn!(driver = %self.driver, "INDI driver read failed: {}", e);
                self.close().await;
                None
            }
        }
    }

    async fn write(&self, message: &IndiMessage) -> Result<()> {
        let bytes = encode(message)?;
        let mut writer = self.writer.lock().await;
        let stdin = writer.as_mut().ok_or(DeviceError::ConnectionClosed)?;
        stdin.write_all(&bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.token.cancel();
            self.writer.lock().await.take();

            let mut child = self.child.lock().await;
            if let Err(e) = child.start_kill() {
                debug!(driver = %self.driver, "Driver already exited: {}", e);
            }
            match child.wait().await {
                Ok(status) => info!(driver = %self.driver, "INDI driver exited with {}", status),
                Err(e) => warn!(driver = %self.driver, "Failed to reap INDI driver: {}", e),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_driver_output() {
        let script = concat!(
            "printf '",
            r#"<defTextVector device="Sim" name="DRIVER_INFO" state="Idle" perm="ro">"#,
            r#"<defText name="DRIVER_EXEC">indi_simulator_focus</defText>"#,
            "</defTextVector>'",
        );
        let connection = ProcessConnection::spawn("sh", ["-c", script]).unwrap();

        let message = connection.read().await.unwrap();
        assert_eq!(
            message.as_vector().unwrap().text("DRIVER_EXEC"),
            Some("indi_simulator_focus")
        );
        assert_eq!(connection.read().await, None);
        assert!(!connection.is_open());
        connection.close().await;
    }

    #[tokio::test]
    async fn test_echo_driver_round_trip() {
        let connection = ProcessConnection::spawn("cat", Vec::<String>::new()).unwrap();
        let command = IndiMessage::from(crate::protocol::Vector::new_number(
            "Focuser",
            "ABS_FOCUS_POSITION",
            &[("FOCUS_ABSOLUTE_POSITION", 100.0)],
        ));

        connection.write(&command).await.unwrap();
        assert_eq!(connection.read().await, Some(command));

        connection.close().await;
        connection.close().await;
        assert_eq!(connection.read().await, None);
    }

    #[test]
    fn test_missing_executable() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let args = Vec::<String>::new();
        assert!(ProcessConnection::spawn("/nonexistent/indi_driver", args).is_err());
    }
}
