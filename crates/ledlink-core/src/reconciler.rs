//! Intended strip state and its replay after reconnection.

use crate::command::{Command, EffectId, EffectParams, Rgb};
use crate::frame::Frame;

/// What the user last asked the strip to show.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntendedDeviceState {
    pub color: Option<Rgb>,
    pub brightness: Option<u8>,
    pub effect: Option<(EffectId, EffectParams)>,
    /// Set by `PowerOff`, cleared by any other state change.
    pub powered_off: bool,
}

/// Single owner of [`IntendedDeviceState`].
#[derive(Debug, Default)]
pub struct Reconciler {
    intended: IntendedDeviceState,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intended(&self) -> &IntendedDeviceState {
        &self.intended
    }

    /// Records a user intent and returns the frame to send for it.
    pub fn apply_intent(&mut self, command: Command) -> Frame {
        let frame = Frame::from(&command);
        let intended = &mut self.intended;
        match command {
            Command::SetColor(color) => {
                intended.color = Some(color);
                intended.powered_off = false;
            }
            Command::SetBrightness(level) => {
                intended.brightness = Some(level);
                intended.powered_off = false;
            }
            Command::SetEffect { id, params } => {
                intended.effect = Some((id, params));
                intended.powered_off = false;
            }
            Command::PowerOff => intended.powered_off = true,
            Command::QueryStatus => {}
        }
        frame
    }

    /// Commands that bring a freshly connected device to the intended state.
    ///
    /// A powered-off intent replays as a lone `PowerOff`; otherwise color,
    /// brightness and effect follow in that order. Calling this does not
    /// change anything.
    pub fn on_reconnect(&self) -> Vec<Command> {
        let intended = &self.intended;
        if intended.powered_off {
            return vec![Command::PowerOff];
        }

        let mut commands = Vec::with_capacity(3);
        if let Some(color) = intended.color {
            commands.push(Command::SetColor(color));
        }
        if let Some(level) = intended.brightness {
            commands.push(Command::SetBrightness(level));
        }
        if let Some((id, params)) = &intended.effect {
            commands.push(Command::SetEffect {
                id: *id,
                params: params.clone(),
            });
        }
        commands
    }
}

/// Collapses runs of updates to the same field into the latest one.
///
/// Order across different fields is preserved and status queries are never
/// merged. Used for slider-style bursts; the end state is unchanged.
pub fn coalesce(commands: Vec<Command>) -> Vec<Command> {
    let mut out: Vec<Command> = Vec::with_capacity(commands.len());
    for command in commands {
        if let Some(last) = out.last_mut() {
            if last.is_state_change() && last.opcode() == command.opcode() {
                *last = command;
                continue;
            }
        }
        out.push(command);
    }
    out
}
