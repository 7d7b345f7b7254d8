//! TCP client for the measurement device.
//!
//! The device emits newline-terminated messages. Frames split across TCP
//! segments are reassembled and joined frames are split by reading line by
//! line. Every frame becomes an [`Item`] stamped with its receipt time.
//! A line longer than the frame limit is forwarded in limit-sized pieces.

use crate::config::Config;
use crate::models::Item;
use chrono::Utc;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between connection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Longest frame buffered before it is forwarded without its terminator
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Reads frames from one device and forwards them to the parser
#[derive(Debug, Clone)]
pub struct DeviceReader {
    host: String,
    port: u16,
    timeout: Option<Duration>,
    reconnect_delay: Duration,
    max_frame: usize,
}

impl DeviceReader {
    /// `timeout` bounds both connecting and waiting for the next frame
    pub fn new(host: impl Into<String>, port: u16, timeout: Option<Duration>) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            reconnect_delay: RECONNECT_DELAY,
            max_frame: MAX_FRAME_BYTES,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.host.clone(), config.port, config.timeout)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Cap the bytes buffered for one frame; at least one byte
    pub fn with_max_frame(mut self, limit: usize) -> Self {
        self.max_frame = limit.max(1);
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Receive frames until `token` is cancelled or the receiver is dropped.
    ///
    /// Connection failures, read errors, timeouts and peer disconnects are
    /// logged and followed by a reconnect. Returns the number of frames sent.
    pub async fn run(self, sender: mpsc::Sender<Item>, token: CancellationToken) -> usize {
        let mut sent = 0;

        while let Some(stream) = self.connect(&token).await {
            let mut reader = BufReader::new(stream);
            let mut fresh = true;

            loop {
                let mut frame = Vec::new();
                let read = tokio::select! {
                    _ = token.cancelled() => return sent,
                    read = self.read_frame(&mut reader, &mut frame) => read,
                };

                match read {
                    Ok(0) => {
                        warn!("The device has closed the connection");
                        break;
                    }
                    Ok(length) => {
                        if length >= self.max_frame && frame.last() != Some(&b'\n') {
                            warn!(
                                "Frame exceeds {} bytes, passing it on in pieces",
                                self.max_frame
                            );
                        }
                        let item = Item::new(frame, Utc::now(), fresh);
                        fresh = false;
                        if sender.send(item).await.is_err() {
                            debug!("Parser has stopped, closing the connection");
                            return sent;
                        }
                        sent += 1;
                    }
                    Err(e) => {
                        error!("{}", e);
                        break;
                    }
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        sent
    }

    /// Connect, retrying until it succeeds or `token` is cancelled
    async fn connect(&self, token: &CancellationToken) -> Option<TcpStream> {
        let address = self.address();
        info!("Attempting to connect to socket at {}...", address);

        loop {
            let attempt = tokio::select! {
                _ = token.cancelled() => return None,
                attempt = self.try_connect() => attempt,
            };

            match attempt {
                Ok(stream) => {
                    info!("Connected to {}. Receiving device data...", address);
                    return Some(stream);
                }
                Err(e) => debug!("Cannot connect to {}: {}", address, e),
            }

            tokio::select! {
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn try_connect(&self) -> io::Result<TcpStream> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))?,
            None => connect.await,
        }
    }

    /// Read up to and including the next `\n`, at most `max_frame` bytes;
    /// 0 bytes means the peer closed
    async fn read_frame(
        &self,
        reader: &mut BufReader<TcpStream>,
        frame: &mut Vec<u8>,
    ) -> io::Result<usize> {
        let mut limited = (&mut *reader).take(self.max_frame as u64);
        let read = limited.read_until(b'\n', frame);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "Read timed out. No messages received in {} seconds.",
                        limit.as_secs_f64()
                    ),
                )
            })?,
            None => read.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_settings() {
        let reader = DeviceReader::new("127.0.0.1", 4001, Some(Duration::from_secs(30)))
            .with_reconnect_delay(Duration::from_millis(10));
        assert_eq!(reader.address(), "127.0.0.1:4001");
        assert_eq!(reader.reconnect_delay, Duration::from_millis(10));
        assert_eq!(reader.timeout, Some(Duration::from_secs(30)));
        assert_eq!(reader.max_frame, MAX_FRAME_BYTES);
        assert_eq!(reader.with_max_frame(0).max_frame, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_connecting() {
        let token = CancellationToken::new();
        token.cancel();
        let (tx, mut rx) = mpsc::channel(4);

        // nothing listens on port 9 of the loopback interface
        let sent = DeviceReader::new("127.0.0.1", 9, None).run(tx, token).await;

        assert_eq!(sent, 0);
        assert!(rx.recv().await.is_none());
    }
}
