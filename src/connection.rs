use crate::error::{DspError, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Byte that ends every P300 message
const FRAME_TERMINATOR: u8 = b'>';

/// Anything the session can write command lines to.
///
/// Writes are fire-and-forget: implementations queue the line and return,
/// nothing waits for the device to acknowledge it.
pub trait Transport: Send + Sync {
    fn send_line(&self, line: &str) -> Result<()>;
}

/// TCP connection to a P300 that frames inbound bytes into lines
pub struct TcpConnection {
    tx: mpsc::UnboundedSender<String>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl TcpConnection {
    /// Connect to `host:port`.
    ///
    /// Returns the connection and a receiver yielding each message the device
    /// sends, trimmed, with the closing `>` left in place. The receiver closes
    /// when the socket does.
    pub async fn connect(host: &str, port: u16) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        tracing::info!("Connecting to {}:{}", host, port);

        let stream = TcpStream::connect((host, port)).await?;
        let (read, mut write) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();

        // Forward queued commands to the socket
        let write_handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = write.write_all(line.as_bytes()).await {
                    tracing::error!("Failed to send command: {}", e);
                    break;
                }
            }
        });

        // Split the inbound byte stream on '>'
        let read_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(read);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(FRAME_TERMINATOR, &mut buf).await {
                    Ok(0) => {
                        tracing::info!("Connection closed by device");
                        break;
                    }
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        tracing::trace!(line, "Received");
                        if line_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                tx,
                read_handle,
                write_handle,
            },
            line_rx,
        ))
    }

    /// Stop both socket tasks
    pub fn close(&self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }
}

impl Transport for TcpConnection {
    fn send_line(&self, line: &str) -> Result<()> {
        tracing::debug!(line, "Sending");
        self.tx
            .send(line.to_string())
            .map_err(|_| DspError::ConnectionClosed)
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_lines_and_writes_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let device = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"< REP 05 AUDIO_MUTE ON >\r\n< REP FW_VER {1.6.2} >")
                .await
                .unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let (connection, mut lines) = TcpConnection::connect("127.0.0.1", port).await.unwrap();
        connection.send_line("< GET MODEL >").unwrap();

        assert_eq!(lines.recv().await.unwrap(), "< REP 05 AUDIO_MUTE ON >");
        assert_eq!(lines.recv().await.unwrap(), "< REP FW_VER {1.6.2} >");
        assert_eq!(device.await.unwrap(), "< GET MODEL >");
    }
}
