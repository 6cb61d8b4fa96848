//! Configuration management.

use anyhow::{Context, Result};
use ledlink_core::{BackoffConfig, EffectId, Rgb, StripStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Brightness used when no strip is configured.
const FALLBACK_BRIGHTNESS: u8 = 128;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gadget serial port the host connects to
    #[serde(default = "default_device")]
    pub device: String,

    /// Serial baud rate (ignored by most USB gadget ports)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Receive poll timeout in milliseconds
    #[serde(default = "default_poll")]
    pub poll_ms: u64,

    /// Receive buffer limit in bytes
    #[serde(default = "default_max_buffer")]
    pub max_buffer: usize,

    /// Reopen backoff while the host is unplugged
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Physical strips driven by the sink
    #[serde(default = "default_strips")]
    pub strips: Vec<StripConfig>,
}

/// One physical LED strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripConfig {
    pub name: String,

    /// Number of LEDs
    pub count: u32,

    /// GPIO data pin
    pub pin: u8,

    /// PWM channel
    #[serde(default)]
    pub channel: u8,

    /// Strip brightness ceiling (0-255)
    #[serde(default = "default_brightness")]
    pub brightness: u8,
}

// Default value functions
fn default_device() -> String {
    "/dev/ttyGS0".to_string()
}

fn default_baud_rate() -> u32 {
    ledlink_core::DEFAULT_BAUD_RATE
}

fn default_poll() -> u64 {
    500
}

fn default_max_buffer() -> usize {
    ledlink_core::session::DEFAULT_MAX_BUFFER
}

fn default_brightness() -> u8 {
    FALLBACK_BRIGHTNESS
}

fn default_strips() -> Vec<StripConfig> {
    vec![
        StripConfig {
            name: "main".to_string(),
            count: 96,
            pin: 18,
            channel: 0,
            brightness: FALLBACK_BRIGHTNESS,
        },
        StripConfig {
            name: "accent".to_string(),
            count: 50,
            pin: 13,
            channel: 1,
            brightness: FALLBACK_BRIGHTNESS,
        },
    ]
}

impl Config {
    /// Loads configuration from a TOML file. A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    /// Strip state at startup: powered, black, first strip's brightness.
    pub fn initial_status(&self) -> StripStatus {
        StripStatus {
            color: Rgb::BLACK,
            brightness: self
                .strips
                .first()
                .map_or(FALLBACK_BRIGHTNESS, |strip| strip.brightness),
            effect: EffectId::Solid,
            powered: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            poll_ms: default_poll(),
            max_buffer: default_max_buffer(),
            backoff: BackoffConfig::default(),
            strips: default_strips(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.device, "/dev/ttyGS0");
        assert_eq!(config.strips.len(), 2);
        assert_eq!(config.strips[0].count, 96);
        assert_eq!(config.strips[1].pin, 13);
    }

    #[test]
    fn test_load_strips_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledlinkd.toml");
        std::fs::write(
            &path,
            r#"
            device = "/dev/ttyAMA0"
            poll_ms = 250

            [[strips]]
            name = "desk"
            count = 30
            pin = 12
            brightness = 64
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.device, "/dev/ttyAMA0");
        assert_eq!(config.poll(), Duration::from_millis(250));
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.strips.len(), 1);
        assert_eq!(config.strips[0].channel, 0);

        let status = config.initial_status();
        assert_eq!(status.brightness, 64);
        assert_eq!(status.color, Rgb::BLACK);
        assert!(status.powered);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "strips = 3").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_no_strips_falls_back_to_default_brightness() {
        let config = Config {
            strips: Vec::new(),
            ..Config::default()
        };
        assert_eq!(config.initial_status().brightness, 128);
    }
}
