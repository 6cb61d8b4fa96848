//! Transport session over a single byte stream.

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, trace, warn};

use crate::frame::{self, Decoded, Frame, MAX_FRAME};
use crate::{Error, Result};

/// Default receive buffer limit.
pub const DEFAULT_MAX_BUFFER: usize = 1024;

/// Default write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK_SIZE: usize = 256;

/// Opens byte streams for an endpoint descriptor.
pub trait Connector: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens the endpoint. The descriptor is opaque to the connector's caller.
    fn open(&mut self, endpoint: &str) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Opens serial ports (USB CDC-ACM gadget on the Pi, COM/tty on the host).
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    fn open_port(&self, endpoint: &str) -> Result<SerialStream> {
        tokio_serial::new(endpoint, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| {
                // A vanished gadget shows up as NotFound or PermissionDenied
                if let tokio_serial::ErrorKind::Io(kind) = &e.kind {
                    if (*kind == ErrorKind::NotFound || *kind == ErrorKind::PermissionDenied)
                        && !std::path::Path::new(endpoint).exists()
                    {
                        return Error::EndpointNotFound(endpoint.to_string());
                    }
                }
                Error::Serial(e)
            })
    }
}

impl Connector for SerialConnector {
    type Stream = SerialStream;

    fn open(&mut self, endpoint: &str) -> impl Future<Output = Result<SerialStream>> + Send {
        let result = self.open_port(endpoint);
        if result.is_ok() {
            debug!("Opened {} at {} baud", endpoint, self.baud_rate);
        }
        std::future::ready(result)
    }
}

/// In-memory connector. Every [`MemoryPlug::plug`] makes one stream available
/// to the next `open`; with nothing plugged in, `open` fails as if the
/// device were absent.
pub struct MemoryConnector {
    sockets: mpsc::UnboundedReceiver<DuplexStream>,
}

/// Device side of a [`MemoryConnector`].
#[derive(Clone)]
pub struct MemoryPlug {
    sockets: mpsc::UnboundedSender<DuplexStream>,
}

/// Creates a connected in-memory connector and plug pair.
pub fn memory_link() -> (MemoryConnector, MemoryPlug) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryConnector { sockets: rx }, MemoryPlug { sockets: tx })
}

impl MemoryPlug {
    /// Plugs in a device and returns its end of the stream.
    pub fn plug(&self) -> DuplexStream {
        let (host, device) = tokio::io::duplex(4096);
        let _ = self.sockets.send(host);
        device
    }
}

impl Connector for MemoryConnector {
    type Stream = DuplexStream;

    fn open(&mut self, endpoint: &str) -> impl Future<Output = Result<DuplexStream>> + Send {
        let result = self
            .sockets
            .try_recv()
            .map_err(|_| Error::EndpointNotFound(endpoint.to_string()));
        std::future::ready(result)
    }
}

/// One open byte-stream endpoint that reads and writes whole frames.
///
/// A session has exactly one owner; there is no internal locking.
pub struct Session<S> {
    endpoint: String,
    stream: Option<S>,
    buf: BytesMut,
    max_buffer: usize,
    write_timeout: Duration,
    discarded: u64,
    /// Bytes thrown away since the last good frame.
    junk: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Wraps an already-open stream.
    pub fn new(endpoint: impl Into<String>, stream: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream: Some(stream),
            buf: BytesMut::with_capacity(DEFAULT_MAX_BUFFER),
            max_buffer: DEFAULT_MAX_BUFFER,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discarded: 0,
            junk: 0,
        }
    }

    /// Opens `endpoint` through `connector`.
    pub async fn open<C>(connector: &mut C, endpoint: &str) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.open(endpoint).await?;
        Ok(Self::new(endpoint, stream))
    }

    /// Sets the receive buffer limit. Never below one maximum-size frame.
    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer.max(MAX_FRAME);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Bytes currently held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes thrown away while resynchronizing.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Writes one frame and flushes it.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let bytes = frame.to_bytes();
        debug!("Sending frame to {}: {:02X?}", self.endpoint, bytes.as_ref());

        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result.map_err(Error::Write),
            Err(_) => Err(Error::Write(std::io::Error::new(
                ErrorKind::TimedOut,
                "write timed out",
            ))),
        }
    }

    /// Waits up to `timeout` for the next valid frame.
    ///
    /// Invalid bytes are skipped. On timeout any partial frame stays
    /// buffered for the next call. Once more than the buffer limit has
    /// arrived without yielding a frame, the buffer is cleared and
    /// `BufferOverflow` is returned.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.next_buffered() {
                return Ok(frame);
            }
            if self.junk + self.buf.len() > self.max_buffer {
                let held = self.junk + self.buf.len();
                self.buf.clear();
                self.junk = 0;
                warn!(
                    "Receive buffer on {} took {} bytes without a frame; resetting",
                    self.endpoint, held
                );
                return Err(Error::BufferOverflow {
                    limit: self.max_buffer,
                });
            }

            let room = self.max_buffer.saturating_sub(self.buf.len()).max(1);
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let chunk = &mut chunk[..room.min(READ_CHUNK_SIZE)];
            let read = match tokio::time::timeout_at(deadline, stream.read(&mut *chunk)).await {
                Err(_) => return Err(Error::Timeout(timeout)),
                Ok(Ok(0)) => return Err(Error::ConnectionClosed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) if e.kind() == ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(Error::Read(e)),
            };
            trace!("Read {} bytes from {}", read, self.endpoint);

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Drops every frame that already arrived, plus any partial one.
    ///
    /// Called before a request so a late reply to an earlier request is
    /// not taken as the answer. Returns the number of frames dropped.
    pub async fn discard_pending(&mut self) -> Result<usize> {
        let mut dropped = 0;
        loop {
            match self.receive(Duration::ZERO).await {
                Ok(frame) => {
                    debug!(
                        "Dropping stale frame from {}: {:02X?}",
                        self.endpoint,
                        frame.payload()
                    );
                    dropped += 1;
                }
                Err(Error::Timeout(_)) => break,
                Err(e) => return Err(e),
            }
        }
        self.discarded += self.buf.len() as u64;
        self.buf.clear();
        self.junk = 0;
        Ok(dropped)
    }

    /// Pops the next complete frame out of the buffer, skipping garbage.
    fn next_buffered(&mut self) -> Option<Frame> {
        loop {
            let (decoded, consumed) = frame::decode(&self.buf);
            self.buf.advance(consumed);
            match decoded {
                Decoded::Frame(frame) => {
                    self.junk = 0;
                    debug!(
                        "Received frame from {}: {:02X?}",
                        self.endpoint,
                        frame.payload()
                    );
                    return Some(frame);
                }
                Decoded::Invalid(defect) => {
                    self.discarded += consumed as u64;
                    self.junk += consumed;
                    debug!(
                        "Discarded {} byte(s) from {}: {:?}",
                        consumed, self.endpoint, defect
                    );
                }
                Decoded::Incomplete => return None,
            }
        }
    }

    /// Releases the stream. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            self.buf.clear();
            self.junk = 0;
            debug!("Closed session on {}", self.endpoint);
        }
    }
}
