//! Connection state machine.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ◄──► Degraded
//!      ▲               │              │              │
//!      └───────────────┴──────────────┴──────────────┘
//! ```
//! Link failures while connected move to `Degraded`; reaching the failure
//! threshold closes the session. One good round trip clears the counter.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::command::{Command, NackReason, Opcode, Response, StripStatus};
use crate::config::LinkConfig;
use crate::frame::Frame;
use crate::session::{Connector, Session};
use crate::{Error, Result};

/// Link state as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but recent operations failed.
    Degraded,
}

impl ConnectionState {
    /// Returns true when a session is open.
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Events published to front ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Ack {
        opcode: u8,
    },
    Nack {
        opcode: u8,
        reason: NackReason,
    },
    Status(StripStatus),
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::StateChanged { from, to } => write!(f, "link {} -> {}", from, to),
            LinkEvent::Ack { opcode } => write!(f, "ack {:#04x}", opcode),
            LinkEvent::Nack { opcode, reason } => write!(f, "nack {:#04x}: {}", opcode, reason),
            LinkEvent::Status(status) => write!(f, "status {}", status),
        }
    }
}

/// Owns the session and drives the connection state machine.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    config: LinkConfig,
    session: Option<Session<C::Stream>>,
    state: ConnectionState,
    failures: u32,
    backoff: Backoff,
    events: broadcast::Sender<LinkEvent>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, config: LinkConfig, events: broadcast::Sender<LinkEvent>) -> Self {
        let backoff = Backoff::new(&config.backoff);
        Self {
            connector,
            config,
            session: None,
            state: ConnectionState::Disconnected,
            failures: 0,
            backoff,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Delay before the next connection attempt; advances the backoff.
    pub fn next_retry_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    /// Opens the endpoint and, if configured, probes the device.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);
        match self.open_session().await {
            Ok(session) => {
                self.session = Some(session);
                self.failures = 0;
                self.backoff.reset();
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", self.config.endpoint, e);
                self.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open_session(&mut self) -> Result<Session<C::Stream>> {
        let stream = self.connector.open(&self.config.endpoint).await?;
        let mut session = Session::new(self.config.endpoint.clone(), stream)
            .with_max_buffer(self.config.max_buffer)
            .with_write_timeout(self.config.response_timeout());

        if self.config.probe_on_connect {
            let query = Frame::from(&Command::QueryStatus);
            match round_trip(&mut session, &query, self.config.response_timeout()).await {
                Ok(Response::Status(status)) => {
                    info!("Device on {} reports {}", self.config.endpoint, status);
                    self.emit(LinkEvent::Status(status));
                }
                Ok(other) => {
                    session.close();
                    return Err(Error::UnexpectedResponse {
                        opcode: Opcode::QueryStatus as u8,
                        response: other.to_string(),
                    });
                }
                Err(e) => {
                    session.close();
                    return Err(e);
                }
            }
        }
        Ok(session)
    }

    /// Sends a frame and waits for the matching reply.
    ///
    /// Link failures feed the failure counter; a reply of any kind, `Nack`
    /// included, counts as a good round trip.
    pub async fn exchange(&mut self, frame: &Frame) -> Result<Response> {
        let timeout = self.config.response_timeout();
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };

        match round_trip(session, frame, timeout).await {
            Ok(response) => {
                self.record_success();
                self.emit_response(frame.opcode(), &response);
                Ok(response)
            }
            Err(e) => {
                if e.is_link_failure() {
                    self.record_failure(&e);
                }
                Err(e)
            }
        }
    }

    /// Closes the session, if any, and returns to `Disconnected`.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.failures = 0;
        self.transition(ConnectionState::Disconnected);
    }

    fn record_failure(&mut self, error: &Error) {
        self.failures += 1;
        if self.failures >= self.config.failure_threshold {
            warn!(
                "Link to {} failed {} times in a row ({}); dropping session",
                self.config.endpoint, self.failures, error
            );
            self.disconnect();
        } else {
            warn!(
                "Link to {} failed ({}/{}): {}",
                self.config.endpoint, self.failures, self.config.failure_threshold, error
            );
            self.transition(ConnectionState::Degraded);
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
        if self.state == ConnectionState::Degraded {
            self.transition(ConnectionState::Connected);
        }
    }

    fn emit_response(&self, opcode: u8, response: &Response) {
        match response {
            Response::Ack(acked) => self.emit(LinkEvent::Ack { opcode: *acked }),
            Response::Nack(reason) => {
                warn!("Device rejected opcode 0x{:02X}: {}", opcode, reason);
                self.emit(LinkEvent::Nack {
                    opcode,
                    reason: *reason,
                });
            }
            Response::Status(status) => self.emit(LinkEvent::Status(*status)),
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        info!("Link {}: {} -> {}", self.config.endpoint, from, to);
        self.emit(LinkEvent::StateChanged { from, to });
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Sends `frame` and waits for the reply that answers it.
///
/// Replies left over from earlier requests are dropped before sending, so
/// a `Nack` (which carries no opcode) always belongs to this request.
/// Mismatched acks and undecodable payloads are skipped until the deadline.
async fn round_trip<S>(session: &mut Session<S>, frame: &Frame, timeout: Duration) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stale = session.discard_pending().await?;
    if stale > 0 {
        debug!("Dropped {} late replies on {}", stale, session.endpoint());
    }
    session.send(frame).await?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let reply = match session.receive(remaining).await {
            Ok(reply) => reply,
            Err(Error::Timeout(_)) => return Err(Error::Timeout(timeout)),
            Err(e) => return Err(e),
        };

        match reply.response() {
            Ok(response) if answers(frame.opcode(), &response) => return Ok(response),
            Ok(response) => debug!(
                "Ignoring {} while waiting on opcode 0x{:02X}",
                response,
                frame.opcode()
            ),
            Err(e) => debug!("Discarding reply frame: {}", e),
        }
    }
}

fn answers(opcode: u8, response: &Response) -> bool {
    match response {
        Response::Ack(acked) => *acked == opcode,
        Response::Nack(_) => true,
        Response::Status(_) => opcode == Opcode::QueryStatus as u8,
    }
}
