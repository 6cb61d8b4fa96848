//! Device-side command handling.
//!
//! The daemon on the Pi decodes frames from the gadget port, applies them to
//! the strip through a [`StripSink`] and answers each one.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::command::{Command, EffectParams, NackReason, Response, StripStatus};
use crate::frame::Frame;
use crate::session::Session;
use crate::{Error, Result};

/// Accepts validated strip state. Implemented by whatever drives the LEDs.
pub trait StripSink: Send {
    /// Shows `status` (always powered) with the effect's parameter bytes.
    fn apply(&mut self, status: &StripStatus, effect_params: &[u8]) -> Result<()>;

    /// Turns every LED off.
    fn blackout(&mut self) -> Result<()>;
}

/// Applies commands to a sink and produces replies.
pub struct Responder<K: StripSink> {
    status: StripStatus,
    effect_params: EffectParams,
    sink: K,
}

impl<K: StripSink> Responder<K> {
    pub fn new(sink: K, initial: StripStatus) -> Self {
        Self {
            status: initial,
            effect_params: EffectParams::default(),
            sink,
        }
    }

    pub fn status(&self) -> StripStatus {
        self.status
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Handles one frame from the host.
    pub fn handle(&mut self, frame: &Frame) -> Response {
        let command = match frame.command() {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejecting frame {:02X?}: {}", frame.payload(), e);
                return Response::Nack(nack_reason(&e));
            }
        };
        debug!("Received {}", command);

        let mut next = self.status;
        let mut next_params = None;
        match &command {
            Command::SetColor(color) => {
                next.color = *color;
                next.powered = true;
            }
            Command::SetBrightness(level) => {
                next.brightness = *level;
                next.powered = true;
            }
            Command::SetEffect { id, params } => {
                next.effect = *id;
                next.powered = true;
                next_params = Some(params.clone());
            }
            Command::PowerOff => next.powered = false,
            Command::QueryStatus => return Response::Status(self.status),
        }

        let params = next_params.as_ref().unwrap_or(&self.effect_params);
        let applied = if next.powered {
            self.sink.apply(&next, params.as_bytes())
        } else {
            self.sink.blackout()
        };

        match applied {
            Ok(()) => {
                self.status = next;
                if let Some(params) = next_params {
                    self.effect_params = params;
                }
                info!("Strip now {}", self.status);
                Response::Ack(command.opcode() as u8)
            }
            Err(e) => {
                warn!("Strip rejected {}: {}", command, e);
                Response::Nack(NackReason::DeviceFault)
            }
        }
    }
}

fn nack_reason(error: &Error) -> NackReason {
    match error {
        Error::UnknownOpcode(_) => NackReason::UnknownOpcode,
        Error::UnknownEffect(_) => NackReason::UnsupportedEffect,
        _ => NackReason::MalformedParams,
    }
}

/// Answers frames on `session` until the link fails.
///
/// Receive timeouts are routine and only re-arm the wait.
pub async fn serve<S, K>(
    session: &mut Session<S>,
    responder: &mut Responder<K>,
    poll: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    K: StripSink,
{
    loop {
        let frame = match session.receive(poll).await {
            Ok(frame) => frame,
            Err(Error::Timeout(_)) => continue,
            Err(e) => return Err(e),
        };
        let response = responder.handle(&frame);
        session.send(&Frame::from(&response)).await?;
    }
}
