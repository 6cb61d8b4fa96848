//! Command set and device responses.
//!
//! Every value here is validated on construction, so anything that reaches
//! the encoder is already within range. Payload layout is
//! `[OPCODE][PARAMS...]`; see [`crate::frame`] for the surrounding frame.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of effect parameter bytes.
pub const MAX_EFFECT_PARAMS: usize = 16;

/// Wire opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    SetColor = 0x01,
    SetBrightness = 0x02,
    SetEffect = 0x03,
    PowerOff = 0x04,
    QueryStatus = 0x05,
    Ack = 0x81,
    Nack = 0x82,
    Status = 0x83,
}

impl Opcode {
    /// Converts a byte value to an Opcode.
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Opcode::SetColor),
            0x02 => Ok(Opcode::SetBrightness),
            0x03 => Ok(Opcode::SetEffect),
            0x04 => Ok(Opcode::PowerOff),
            0x05 => Ok(Opcode::QueryStatus),
            0x81 => Ok(Opcode::Ack),
            0x82 => Ok(Opcode::Nack),
            0x83 => Ok(Opcode::Status),
            _ => Err(Error::UnknownOpcode(value)),
        }
    }
}

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Builds a color from wide integers, rejecting anything outside 0-255.
    pub fn try_new(r: i64, g: i64, b: i64) -> Result<Self> {
        Ok(Self {
            r: channel("red", r)?,
            g: channel("green", g)?,
            b: channel("blue", b)?,
        })
    }
}

fn channel(field: &'static str, value: i64) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::InvalidValue {
        field,
        value,
        expected: "0-255",
    })
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = Error;

    /// Parses `r,g,b` or `#RRGGBB`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return Err(Error::InvalidCommand(format!("bad hex color '{}'", s)));
            }
            let component = |range: std::ops::Range<usize>| {
                u8::from_str_radix(&hex[range], 16)
                    .map_err(|_| Error::InvalidCommand(format!("bad hex color '{}'", s)))
            };
            return Ok(Rgb::new(component(0..2)?, component(2..4)?, component(4..6)?));
        }

        let values = parse_numbers(s)?;
        match values.as_slice() {
            [r, g, b] => Rgb::try_new(*r, *g, *b),
            _ => Err(Error::InvalidCommand(format!(
                "color requires 3 values, got {}",
                values.len()
            ))),
        }
    }
}

/// Effect identifiers understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum EffectId {
    /// Plain color, no animation.
    #[default]
    Solid = 0x00,
    /// Rainbow wheel scrolling along the whole strip.
    RainbowWave = 0x01,
    /// Rainbow wheel stepped per LED group.
    GroupedRainbow = 0x02,
    /// Brightness pulsing on the current color.
    Breathing = 0x03,
    /// Full-white flash for checking the wiring.
    TestFlash = 0x04,
}

impl EffectId {
    /// Converts a byte value to an EffectId.
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(EffectId::Solid),
            0x01 => Ok(EffectId::RainbowWave),
            0x02 => Ok(EffectId::GroupedRainbow),
            0x03 => Ok(EffectId::Breathing),
            0x04 => Ok(EffectId::TestFlash),
            _ => Err(Error::UnknownEffect(format!("0x{:02X}", value))),
        }
    }
}

impl FromStr for EffectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "solid" => Ok(EffectId::Solid),
            "rainbow" | "rainbow-wave" => Ok(EffectId::RainbowWave),
            "grouped" | "grouped-rainbow" => Ok(EffectId::GroupedRainbow),
            "breathing" => Ok(EffectId::Breathing),
            "test" | "test-flash" => Ok(EffectId::TestFlash),
            other => Err(Error::UnknownEffect(other.to_string())),
        }
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectId::Solid => write!(f, "solid"),
            EffectId::RainbowWave => write!(f, "rainbow-wave"),
            EffectId::GroupedRainbow => write!(f, "grouped-rainbow"),
            EffectId::Breathing => write!(f, "breathing"),
            EffectId::TestFlash => write!(f, "test-flash"),
        }
    }
}

/// Opaque effect parameter bytes, bounded by [`MAX_EFFECT_PARAMS`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectParams(Vec<u8>);

impl EffectParams {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() > MAX_EFFECT_PARAMS {
            return Err(Error::EffectParamsTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A command sent from the host to the strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetColor(Rgb),
    SetBrightness(u8),
    SetEffect { id: EffectId, params: EffectParams },
    PowerOff,
    QueryStatus,
}

impl Command {
    /// Builds a `SetColor` from wide integers.
    pub fn set_color(r: i64, g: i64, b: i64) -> Result<Self> {
        Ok(Command::SetColor(Rgb::try_new(r, g, b)?))
    }

    /// Builds a `SetBrightness` from a wide integer.
    pub fn set_brightness(level: i64) -> Result<Self> {
        Ok(Command::SetBrightness(channel("brightness", level)?))
    }

    /// Builds a `SetEffect`, checking the parameter length.
    pub fn set_effect(id: EffectId, params: Vec<u8>) -> Result<Self> {
        Ok(Command::SetEffect {
            id,
            params: EffectParams::new(params)?,
        })
    }

    /// Builds a `SetEffect` from wide integer parameters.
    pub fn set_effect_wide(id: EffectId, params: &[i64]) -> Result<Self> {
        let params = params
            .iter()
            .map(|&p| channel("effect parameter", p))
            .collect::<Result<Vec<_>>>()?;
        Self::set_effect(id, params)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Command::SetColor(_) => Opcode::SetColor,
            Command::SetBrightness(_) => Opcode::SetBrightness,
            Command::SetEffect { .. } => Opcode::SetEffect,
            Command::PowerOff => Opcode::PowerOff,
            Command::QueryStatus => Opcode::QueryStatus,
        }
    }

    /// Returns true for commands that change what the strip shows.
    pub fn is_state_change(&self) -> bool {
        !matches!(self, Command::QueryStatus)
    }

    pub fn to_frame_payload(&self) -> Vec<u8> {
        let mut payload = vec![self.opcode() as u8];
        match self {
            Command::SetColor(color) => payload.extend_from_slice(&[color.r, color.g, color.b]),
            Command::SetBrightness(level) => payload.push(*level),
            Command::SetEffect { id, params } => {
                payload.push(*id as u8);
                payload.extend_from_slice(params.as_bytes());
            }
            Command::PowerOff | Command::QueryStatus => {}
        }
        payload
    }

    pub fn from_frame_payload(payload: &[u8]) -> Result<Self> {
        let (&opcode, params) = payload.split_first().ok_or(Error::MalformedParams {
            opcode: 0,
            expected: 1,
            actual: 0,
        })?;

        match Opcode::from_byte(opcode)? {
            Opcode::SetColor => {
                let [r, g, b] = fixed::<3>(opcode, params)?;
                Ok(Command::SetColor(Rgb::new(r, g, b)))
            }
            Opcode::SetBrightness => {
                let [level] = fixed::<1>(opcode, params)?;
                Ok(Command::SetBrightness(level))
            }
            Opcode::SetEffect => {
                let (&id, rest) = params.split_first().ok_or(Error::MalformedParams {
                    opcode,
                    expected: 1,
                    actual: 0,
                })?;
                if rest.len() > MAX_EFFECT_PARAMS {
                    return Err(Error::MalformedParams {
                        opcode,
                        expected: 1 + MAX_EFFECT_PARAMS,
                        actual: params.len(),
                    });
                }
                Ok(Command::SetEffect {
                    id: EffectId::from_byte(id)?,
                    params: EffectParams(rest.to_vec()),
                })
            }
            Opcode::PowerOff => {
                fixed::<0>(opcode, params)?;
                Ok(Command::PowerOff)
            }
            Opcode::QueryStatus => {
                fixed::<0>(opcode, params)?;
                Ok(Command::QueryStatus)
            }
            Opcode::Ack | Opcode::Nack | Opcode::Status => Err(Error::UnknownOpcode(opcode)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetColor(color) => write!(f, "COLOR:{}", color),
            Command::SetBrightness(level) => write!(f, "BRIGHTNESS:{}", level),
            Command::SetEffect { id, params } => {
                write!(f, "EFFECT:{}", id)?;
                for byte in params.as_bytes() {
                    write!(f, ",{}", byte)?;
                }
                Ok(())
            }
            Command::PowerOff => write!(f, "OFF"),
            Command::QueryStatus => write!(f, "STATUS"),
        }
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Parses the line syntax used by the controller console:
    /// `COLOR:r,g,b`, `BRIGHTNESS:n`, `EFFECT:name[,p...]`, `TEST`, `OFF`,
    /// `STATUS`.
    fn from_str(s: &str) -> Result<Self> {
        let line = s.trim();
        let (name, args) = match line.split_once(':') {
            Some((name, args)) => (name.trim(), Some(args.trim())),
            None => (line, None),
        };

        match (name.to_uppercase().as_str(), args) {
            ("COLOR", Some(args)) => Ok(Command::SetColor(args.parse()?)),
            ("BRIGHTNESS", Some(args)) => match parse_numbers(args)?.as_slice() {
                [level] => Command::set_brightness(*level),
                _ => Err(Error::InvalidCommand(
                    "brightness requires 1 value".to_string(),
                )),
            },
            ("EFFECT", Some(args)) => {
                let (effect, rest) = match args.split_once(',') {
                    Some((effect, rest)) => (effect, rest),
                    None => (args, ""),
                };
                Command::set_effect_wide(effect.parse()?, &parse_numbers(rest)?)
            }
            ("TEST", None) => Command::set_effect(EffectId::TestFlash, Vec::new()),
            ("OFF", None) => Ok(Command::PowerOff),
            ("STATUS", None) => Ok(Command::QueryStatus),
            _ => Err(Error::InvalidCommand(line.to_string())),
        }
    }
}

/// Reason codes carried by a `Nack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NackReason {
    UnknownOpcode,
    MalformedParams,
    UnsupportedEffect,
    DeviceFault,
    Other(u8),
}

impl NackReason {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x01 => NackReason::UnknownOpcode,
            0x02 => NackReason::MalformedParams,
            0x03 => NackReason::UnsupportedEffect,
            0x04 => NackReason::DeviceFault,
            other => NackReason::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            NackReason::UnknownOpcode => 0x01,
            NackReason::MalformedParams => 0x02,
            NackReason::UnsupportedEffect => 0x03,
            NackReason::DeviceFault => 0x04,
            NackReason::Other(value) => value,
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackReason::UnknownOpcode => write!(f, "unknown opcode"),
            NackReason::MalformedParams => write!(f, "malformed parameters"),
            NackReason::UnsupportedEffect => write!(f, "unsupported effect"),
            NackReason::DeviceFault => write!(f, "device fault"),
            NackReason::Other(value) => write!(f, "reason 0x{:02X}", value),
        }
    }
}

/// What the strip is currently showing, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StripStatus {
    pub color: Rgb,
    pub brightness: u8,
    pub effect: EffectId,
    pub powered: bool,
}

impl fmt::Display for StripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "color {} brightness {} effect {} power {}",
            self.color,
            self.brightness,
            self.effect,
            if self.powered { "on" } else { "off" }
        )
    }
}

/// A device reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Command with the given opcode was applied.
    Ack(u8),
    /// Command was rejected.
    Nack(NackReason),
    /// Current strip state.
    Status(StripStatus),
}

impl Response {
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Ack(_) => Opcode::Ack,
            Response::Nack(_) => Opcode::Nack,
            Response::Status(_) => Opcode::Status,
        }
    }

    pub fn to_frame_payload(&self) -> Vec<u8> {
        let mut payload = vec![self.opcode() as u8];
        match self {
            Response::Ack(opcode) => payload.push(*opcode),
            Response::Nack(reason) => payload.push(reason.to_byte()),
            Response::Status(status) => payload.extend_from_slice(&[
                status.color.r,
                status.color.g,
                status.color.b,
                status.brightness,
                status.effect as u8,
                status.powered as u8,
            ]),
        }
        payload
    }

    pub fn from_frame_payload(payload: &[u8]) -> Result<Self> {
        let (&opcode, params) = payload.split_first().ok_or(Error::MalformedParams {
            opcode: 0,
            expected: 1,
            actual: 0,
        })?;

        match Opcode::from_byte(opcode)? {
            Opcode::Ack => {
                let [acked] = fixed::<1>(opcode, params)?;
                Ok(Response::Ack(acked))
            }
            Opcode::Nack => {
                let [reason] = fixed::<1>(opcode, params)?;
                Ok(Response::Nack(NackReason::from_byte(reason)))
            }
            Opcode::Status => {
                let [r, g, b, brightness, effect, powered] = fixed::<6>(opcode, params)?;
                Ok(Response::Status(StripStatus {
                    color: Rgb::new(r, g, b),
                    brightness,
                    effect: EffectId::from_byte(effect)?,
                    powered: powered != 0,
                }))
            }
            _ => Err(Error::UnknownOpcode(opcode)),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack(opcode) => write!(f, "ACK 0x{:02X}", opcode),
            Response::Nack(reason) => write!(f, "NACK ({})", reason),
            Response::Status(status) => write!(f, "STATUS {}", status),
        }
    }
}

/// Checks a parameter slice has exactly `N` bytes.
fn fixed<const N: usize>(opcode: u8, params: &[u8]) -> Result<[u8; N]> {
    params.try_into().map_err(|_| Error::MalformedParams {
        opcode,
        expected: N,
        actual: params.len(),
    })
}

fn parse_numbers(s: &str) -> Result<Vec<i64>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| Error::InvalidCommand(format!("'{}' is not an integer", part)))
        })
        .collect()
}
