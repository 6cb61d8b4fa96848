//! LED Link Core Library
//!
//! Serial command protocol and connection engine for driving an LED strip
//! attached to a Raspberry Pi USB-serial gadget: frame codec, command set,
//! transport session, connection state machine and intended-state
//! reconciliation, plus the device-side responder.

pub mod backoff;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod manager;
pub mod reconciler;
pub mod session;
pub mod worker;

#[cfg(test)]
mod testing;

pub use command::{Command, EffectId, NackReason, Response, Rgb, StripStatus};
pub use config::{BackoffConfig, LinkConfig};
pub use device::{Responder, StripSink};
pub use error::{Error, Result};
pub use frame::{Decoded, Frame};
pub use manager::{ConnectionManager, ConnectionState, LinkEvent};
pub use reconciler::{IntendedDeviceState, Reconciler};
pub use session::{memory_link, Connector, MemoryConnector, MemoryPlug, SerialConnector, Session};
pub use worker::{spawn, LinkHandle, LinkWorker};

/// Default host-side baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115200;
