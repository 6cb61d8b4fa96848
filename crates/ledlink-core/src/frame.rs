//! Frame codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬───────────┬──────────┬────────────────┬──────────────┐
//! │ START 0xA5 │ LEN (1B)  │ OPCODE   │ PARAMS         │ CHECKSUM (1B)│
//! │            │ = 1 + N   │ (1B)     │ (N bytes)      │ sum mod 256  │
//! └────────────┴───────────┴──────────┴────────────────┴──────────────┘
//! ```
//! The checksum covers OPCODE and PARAMS. A receiver that hits anything
//! invalid skips forward to the next START byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::command::{Command, Response, MAX_EFFECT_PARAMS};
use crate::{Error, Result};

/// Frame start marker.
pub const START: u8 = 0xA5;

/// Largest payload (opcode + params) the protocol carries.
pub const MAX_PAYLOAD: usize = 2 + MAX_EFFECT_PARAMS;

/// START + LEN + CHECKSUM.
pub const OVERHEAD: usize = 3;

/// Largest complete frame on the wire.
pub const MAX_FRAME: usize = MAX_PAYLOAD + OVERHEAD;

/// A fully validated frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Wraps a raw payload, checking its length fits the format.
    pub fn from_payload(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.is_empty() || payload.len() > MAX_PAYLOAD {
            return Err(Error::MalformedParams {
                opcode: payload.first().copied().unwrap_or(0),
                expected: MAX_PAYLOAD,
                actual: payload.len(),
            });
        }
        Ok(Self { payload })
    }

    /// The opcode byte.
    pub fn opcode(&self) -> u8 {
        self.payload[0]
    }

    /// Opcode and params.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serializes the frame for the wire.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.payload.len() + OVERHEAD);
        dst.put_u8(START);
        dst.put_u8(self.payload.len() as u8);
        dst.put_slice(&self.payload);
        dst.put_u8(checksum(&self.payload));
        dst.freeze()
    }

    /// Interprets the payload as a host command.
    pub fn command(&self) -> Result<Command> {
        Command::from_frame_payload(&self.payload)
    }

    /// Interprets the payload as a device response.
    pub fn response(&self) -> Result<Response> {
        Response::from_frame_payload(&self.payload)
    }
}

impl From<&Command> for Frame {
    fn from(command: &Command) -> Self {
        Self {
            payload: Bytes::from(command.to_frame_payload()),
        }
    }
}

impl From<&Response> for Frame {
    fn from(response: &Response) -> Self {
        Self {
            payload: Bytes::from(response.to_frame_payload()),
        }
    }
}

/// Why a candidate frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDefect {
    /// Leading bytes are not a START marker.
    BadStart,
    /// LEN is zero or larger than [`MAX_PAYLOAD`].
    BadLength(u8),
    /// Checksum byte does not match the payload.
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Header claims more bytes than have arrived, but a complete frame
    /// already starts inside that span.
    Overrun,
}

/// Result of one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// More bytes are needed; nothing was consumed.
    Incomplete,
    Invalid(FrameDefect),
}

/// Checksum over opcode and params.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &x| acc.wrapping_add(x))
}

/// Encodes a command into a complete wire frame.
pub fn encode(command: &Command) -> Bytes {
    Frame::from(command).to_bytes()
}

/// Decodes one step from the front of `buf`.
///
/// Returns the outcome and how many bytes the caller should drop. An
/// `Invalid` result always consumes at least one byte; garbage before a
/// START marker is skipped in one step.
pub fn decode(buf: &[u8]) -> (Decoded, usize) {
    let Some(&first) = buf.first() else {
        return (Decoded::Incomplete, 0);
    };

    if first != START {
        let skip = buf
            .iter()
            .position(|&b| b == START)
            .unwrap_or(buf.len());
        return (Decoded::Invalid(FrameDefect::BadStart), skip);
    }

    let Some(&len) = buf.get(1) else {
        return (Decoded::Incomplete, 0);
    };
    let payload_len = len as usize;
    if payload_len == 0 || payload_len > MAX_PAYLOAD {
        return (Decoded::Invalid(FrameDefect::BadLength(len)), 1);
    }

    let total = payload_len + OVERHEAD;
    if buf.len() < total {
        if (1..buf.len()).any(|at| is_complete_frame(&buf[at..])) {
            return (Decoded::Invalid(FrameDefect::Overrun), 1);
        }
        return (Decoded::Incomplete, 0);
    }

    let payload = &buf[2..2 + payload_len];
    let actual = buf[2 + payload_len];
    let expected = checksum(payload);
    if actual != expected {
        return (
            Decoded::Invalid(FrameDefect::ChecksumMismatch { expected, actual }),
            1,
        );
    }

    let frame = Frame {
        payload: Bytes::copy_from_slice(payload),
    };
    (Decoded::Frame(frame), total)
}

/// True when `buf` starts with a whole frame whose checksum matches.
fn is_complete_frame(buf: &[u8]) -> bool {
    let [START, len, rest @ ..] = buf else {
        return false;
    };
    let payload_len = *len as usize;
    if payload_len == 0 || payload_len > MAX_PAYLOAD || rest.len() <= payload_len {
        return false;
    }
    checksum(&rest[..payload_len]) == rest[payload_len]
}
