//! PTY channel abstraction for interactive sessions.

use std::time::Duration;

use bytes::BytesMut;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout};

use crate::error::ChannelError;

/// Configuration for PTY channel behavior.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Longest wait for a single read before giving up.
    pub read_timeout: Duration,

    /// Maximum bytes handed out per read.
    pub recv_buf_len: usize,

    /// Attempts to wait for output right after a send.
    pub max_ready_polls: u32,

    /// Sleep between polls and between reads.
    pub poll_interval: Duration,

    /// Trailing bytes of output inspected by the classifier.
    pub search_depth: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(90),
            recv_buf_len: 32_768,
            max_ready_polls: 32,
            poll_interval: Duration::from_millis(300),
            search_depth: 65_536,
        }
    }
}

/// Interactive shell stream with bounded, timeout-guarded reads.
///
/// Data read ahead while polling for readiness is kept in `pending` and
/// handed out before the stream is read again.
pub struct PtyChannel<S> {
    /// Underlying byte stream (an SSH channel in production).
    stream: S,

    /// Configuration for this channel.
    config: ChannelConfig,

    /// Received but not yet consumed bytes.
    pending: BytesMut,

    /// Whether the channel is open.
    is_open: bool,
}

impl<S> PtyChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already opened shell stream.
    pub fn new(stream: S, config: ChannelConfig) -> Self {
        Self {
            pending: BytesMut::with_capacity(config.recv_buf_len),
            stream,
            config,
            is_open: true,
        }
    }

    /// Create a channel with default configuration.
    pub fn with_defaults(stream: S) -> Self {
        Self::new(stream, ChannelConfig::default())
    }

    /// Check if the channel is open.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Get the read timeout.
    pub fn timeout(&self) -> Duration {
        self.config.read_timeout
    }

    /// Set the read timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.read_timeout = timeout;
    }

    /// Write text to the shell.
    pub async fn send(&mut self, text: &str) -> Result<(), ChannelError> {
        if !self.is_open {
            return Err(ChannelError::Closed);
        }
        self.stream.write_all(text.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait until output is available, up to `max_ready_polls` polls.
    ///
    /// Returns whether output arrived. Running out of polls is not an error;
    /// the caller proceeds to its regular timeout-guarded reads.
    pub async fn wait_for_output(&mut self) -> Result<bool, ChannelError> {
        for attempt in 0..self.config.max_ready_polls {
            if !self.pending.is_empty() {
                return Ok(true);
            }
            match timeout(self.config.poll_interval, self.fill()).await {
                Ok(Ok(_)) => return Ok(!self.pending.is_empty()),
                Ok(Err(e)) => return Err(e),
                Err(_) => trace!("no output yet (poll {})", attempt + 1),
            }
        }
        debug!(
            "no output after {} polls, continuing",
            self.config.max_ready_polls
        );
        Ok(false)
    }

    /// Read the next chunk of at most `recv_buf_len` bytes.
    ///
    /// Output that already arrived behind the first read is collected into
    /// the same chunk.
    ///
    /// Fails with [`ChannelError::Timeout`] when nothing arrives within the
    /// read timeout.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ChannelError> {
        if self.pending.is_empty() {
            if !self.is_open {
                return Err(ChannelError::Closed);
            }
            let read_timeout = self.config.read_timeout;
            timeout(read_timeout, self.fill())
                .await
                .map_err(|_| ChannelError::Timeout(read_timeout))??;
        }
        self.drain_ready().await;

        let n = self.pending.len().min(self.config.recv_buf_len);
        let chunk = self.pending.split_to(n).to_vec();
        trace!("recv {} bytes", chunk.len());
        Ok(chunk)
    }

    /// Sleep for one poll interval.
    pub async fn pause(&self) {
        if !self.config.poll_interval.is_zero() {
            sleep(self.config.poll_interval).await;
        }
    }

    /// Close the channel. Safe to call repeatedly; errors are swallowed.
    pub async fn close(&mut self) {
        if !self.is_open {
            return;
        }
        self.is_open = false;
        if let Err(e) = self.stream.shutdown().await {
            debug!("ignoring error while closing channel: {}", e);
        }
    }

    /// Pull in whatever the stream already has, up to `recv_buf_len`.
    async fn drain_ready(&mut self) {
        while self.is_open && self.pending.len() < self.config.recv_buf_len {
            match timeout(Duration::ZERO, self.fill()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    trace!("stopped draining: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }
    }

    /// Read once from the stream into `pending`.
    async fn fill(&mut self) -> Result<usize, ChannelError> {
        let mut chunk = vec![0u8; self.config.recv_buf_len];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            self.is_open = false;
            return Err(ChannelError::Closed);
        }
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}
