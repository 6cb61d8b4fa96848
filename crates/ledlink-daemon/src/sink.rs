//! Strip sink that reports every applied state through tracing.

use ledlink_core::{Error, Result, StripSink, StripStatus};
use tracing::info;

use crate::config::StripConfig;

/// Logs strip updates instead of driving LEDs.
pub struct LogSink {
    strips: Vec<StripConfig>,
    shown: Option<StripStatus>,
}

impl LogSink {
    pub fn new(strips: Vec<StripConfig>) -> Self {
        Self {
            strips,
            shown: None,
        }
    }

    /// State currently shown, `None` while blacked out.
    pub fn shown(&self) -> Option<StripStatus> {
        self.shown
    }
}

/// Requested brightness scaled by the strip's ceiling.
pub fn effective_brightness(strip: &StripConfig, status: &StripStatus) -> u8 {
    (u16::from(status.brightness) * u16::from(strip.brightness) / 255) as u8
}

impl StripSink for LogSink {
    fn apply(&mut self, status: &StripStatus, effect_params: &[u8]) -> Result<()> {
        if self.strips.is_empty() {
            return Err(Error::InvalidValue {
                field: "strips",
                value: 0,
                expected: "at least one configured strip",
            });
        }
        for strip in &self.strips {
            info!(
                "{} ({} LEDs on GPIO{}): {} {} brightness {} params {:02X?}",
                strip.name,
                strip.count,
                strip.pin,
                status.effect,
                status.color,
                effective_brightness(strip, status),
                effect_params
            );
        }
        self.shown = Some(*status);
        Ok(())
    }

    fn blackout(&mut self) -> Result<()> {
        for strip in &self.strips {
            info!("{} ({} LEDs on GPIO{}): off", strip.name, strip.count, strip.pin);
        }
        self.shown = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ledlink_core::{EffectId, Rgb};

    fn status(brightness: u8) -> StripStatus {
        StripStatus {
            color: Rgb::new(255, 0, 0),
            brightness,
            effect: EffectId::Solid,
            powered: true,
        }
    }

    #[test]
    fn test_apply_and_blackout() {
        let mut sink = LogSink::new(Config::default().strips);
        sink.apply(&status(200), &[]).unwrap();
        assert_eq!(sink.shown(), Some(status(200)));
        sink.blackout().unwrap();
        assert_eq!(sink.shown(), None);
    }

    #[test]
    fn test_apply_without_strips_fails() {
        let mut sink = LogSink::new(Vec::new());
        assert!(sink.apply(&status(10), &[]).is_err());
        assert_eq!(sink.shown(), None);
    }

    #[test]
    fn test_effective_brightness() {
        let mut strip = Config::default().strips.remove(0);
        strip.brightness = 255;
        assert_eq!(effective_brightness(&strip, &status(200)), 200);
        strip.brightness = 128;
        assert_eq!(effective_brightness(&strip, &status(255)), 128);
        assert_eq!(effective_brightness(&strip, &status(0)), 0);
    }
}
