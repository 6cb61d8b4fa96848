//! Fault-injecting transport and devices shared by unit tests.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::command::{Command, Response, StripStatus};
use crate::device::{serve, Responder, StripSink};
use crate::frame::Frame;
use crate::session::{Connector, Session};
use crate::{Error, Result};

pub struct NullSink;

impl StripSink for NullSink {
    fn apply(&mut self, _status: &StripStatus, _params: &[u8]) -> Result<()> {
        Ok(())
    }

    fn blackout(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Switches shared between a test and its [`FlakyStream`].
#[derive(Default)]
pub struct Faults {
    /// Writes fail with `BrokenPipe`.
    pub fail_writes: AtomicBool,
    /// Writes report success but never reach the device.
    pub swallow_writes: AtomicBool,
    /// Reads fail with `ConnectionReset`.
    pub fail_reads: AtomicBool,
}

/// Duplex stream with switchable faults.
pub struct FlakyStream {
    inner: DuplexStream,
    faults: Arc<Faults>,
}

impl AsyncRead for FlakyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        }
        if self.faults.swallow_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Ok(buf.len()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Hands out a single flaky stream.
pub struct FlakyConnector {
    stream: Option<FlakyStream>,
}

impl FlakyConnector {
    /// Returns the connector, the device end of the stream and its faults.
    pub fn new() -> (Self, DuplexStream, Arc<Faults>) {
        let (host, device) = tokio::io::duplex(4096);
        let faults = Arc::new(Faults::default());
        let connector = Self {
            stream: Some(FlakyStream {
                inner: host,
                faults: faults.clone(),
            }),
        };
        (connector, device, faults)
    }

    /// A connector with nothing to open.
    pub fn empty() -> Self {
        Self { stream: None }
    }
}

impl Connector for FlakyConnector {
    type Stream = FlakyStream;

    fn open(&mut self, endpoint: &str) -> impl Future<Output = Result<FlakyStream>> + Send {
        std::future::ready(
            self.stream
                .take()
                .ok_or_else(|| Error::EndpointNotFound(endpoint.to_string())),
        )
    }
}

/// Runs a well-behaved device on `stream`.
pub fn spawn_device(stream: DuplexStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut session = Session::new("device", stream);
        let mut responder = Responder::new(NullSink, StripStatus::default());
        let _ = serve(&mut session, &mut responder, Duration::from_millis(20)).await;
    })
}

/// Runs a well-behaved device that reports every command it decodes.
pub fn spawn_recording_device(
    stream: DuplexStream,
    seen: mpsc::UnboundedSender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut session = Session::new("device", stream);
        let mut responder = Responder::new(NullSink, StripStatus::default());
        loop {
            let frame = match session.receive(Duration::from_millis(20)).await {
                Ok(frame) => frame,
                Err(Error::Timeout(_)) => continue,
                Err(_) => return,
            };
            if let Ok(command) = frame.command() {
                let _ = seen.send(command);
            }
            let response = responder.handle(&frame);
            if session.send(&Frame::from(&response)).await.is_err() {
                return;
            }
        }
    })
}

/// Runs a device that answers every frame with `reply`.
pub fn spawn_fixed_reply_device(stream: DuplexStream, reply: Response) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut session = Session::new("device", stream);
        loop {
            match session.receive(Duration::from_millis(20)).await {
                Ok(_) => {
                    if session.send(&Frame::from(&reply)).await.is_err() {
                        return;
                    }
                }
                Err(Error::Timeout(_)) => continue,
                Err(_) => return,
            }
        }
    })
}
