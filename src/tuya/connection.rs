use crate::domain::{ConnectError, SendError};
use crate::tuya::codec::Codec;
use crate::tuya::frame::{self, FrameError, Message};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, instrument, trace, warn};

/// Replies of another kind (asynchronous status pushes) skipped while waiting for an answer.
const MAX_UNRELATED_REPLIES: usize = 8;

#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_attempts: usize,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by the device")]
    Closed,
    #[error("no reply to command {0}")]
    NoReply(u32),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<TransportError> for SendError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Io(e) => SendError::NotConnected(e.to_string()),
            TransportError::Closed => SendError::NotConnected("closed by the device".to_string()),
            TransportError::Timeout(_) | TransportError::NoReply(_) => SendError::Timeout,
            TransportError::Frame(e) if e.is_key_mismatch() => SendError::KeyRejected,
            TransportError::Frame(e) => SendError::ProtocolError(e.to_string()),
        }
    }
}

impl From<TransportError> for ConnectError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout(_) | TransportError::NoReply(_) => ConnectError::Timeout,
            TransportError::Frame(e) if e.is_key_mismatch() => ConnectError::AuthRejected,
            other => ConnectError::Unreachable(other.to_string()),
        }
    }
}

/// Opens the TCP connection, retrying with exponential backoff and jitter.
#[instrument(skip_all, fields(host = %settings.host, port = settings.port))]
pub async fn open(settings: &ConnectSettings) -> Result<TcpStream, ConnectError> {
    // Base 2 doubles every delay, the factor scales the first one to the configured initial delay
    let factor = (settings.retry_initial_delay.as_millis() as u64 / 2).max(1);
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(settings.retry_max_delay)
        .map(jitter)
        .take(settings.retry_attempts.saturating_sub(1));

    Retry::spawn(strategy, || async {
        open_once(settings).await.inspect_err(|e| {
            warn!("⚠️ Connecting to {}:{} failed: {}", settings.host, settings.port, e);
        })
    })
    .await
}

async fn open_once(settings: &ConnectSettings) -> Result<TcpStream, ConnectError> {
    let stream = timeout(settings.connect_timeout, TcpStream::connect((settings.host.as_str(), settings.port)))
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
    stream.set_nodelay(true).map_err(|e| ConnectError::Unreachable(e.to_string()))?;
    Ok(stream)
}

/// One framed, encrypted conversation with a lamp.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    codec: Codec,
    seq: u32,
    io_timeout: Duration,
    buffer: Vec<u8>,
}

impl Connection {
    pub fn new(stream: TcpStream, codec: Codec, io_timeout: Duration) -> Self {
        Connection {
            stream,
            codec,
            seq: 0,
            io_timeout,
            buffer: Vec::new(),
        }
    }

    pub fn codec_mut(&mut self) -> &mut Codec {
        &mut self.codec
    }

    pub async fn send(&mut self, cmd: u32, payload: &[u8]) -> Result<u32, TransportError> {
        self.seq = self.seq.wrapping_add(1);
        let frame = self.codec.encode(self.seq, cmd, payload)?;
        trace!(seq = self.seq, cmd, len = frame.len(), "Writing frame");

        let io_timeout = self.io_timeout;
        timeout(io_timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| TransportError::Timeout(io_timeout))??;
        Ok(self.seq)
    }

    pub async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            match frame::frame_len(&self.buffer) {
                Ok(Some(len)) if self.buffer.len() >= len => {
                    let data: Vec<u8> = self.buffer.drain(..len).collect();
                    let message = self.codec.decode(&data)?;
                    trace!(seq = message.seq, cmd = message.cmd, retcode = ?message.retcode, "Read frame");
                    return Ok(message);
                }
                Ok(_) => {}
                Err(e) => {
                    // Nothing after a corrupt header can be trusted
                    self.buffer.clear();
                    return Err(e.into());
                }
            }

            let io_timeout = self.io_timeout;
            let read = timeout(io_timeout, self.stream.read_buf(&mut self.buffer))
                .await
                .map_err(|_| TransportError::Timeout(io_timeout))??;
            if read == 0 {
                return Err(TransportError::Closed);
            }
        }
    }

    /// Sends `cmd` and waits for the first reply of kind `expect`.
    pub async fn request(&mut self, cmd: u32, payload: &[u8], expect: u32) -> Result<Message, TransportError> {
        self.send(cmd, payload).await?;

        for _ in 0..MAX_UNRELATED_REPLIES {
            let message = self.receive().await?;
            if message.cmd == expect {
                return Ok(message);
            }
            debug!(cmd = message.cmd, "🔸 Skipping unrelated message while waiting for {}", expect);
        }
        Err(TransportError::NoReply(cmd))
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Closing connection failed: {}", e);
        }
    }
}
