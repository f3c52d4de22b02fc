use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::session::{Timing, POLL_INTERVAL, SETTLE_DELAY};

pub const DEFAULT_I2C_BUS: u8 = 1;
pub const DEFAULT_I2C_ADDRESS: u16 = 0x50;
pub const DEFAULT_DETECT_PIN: u32 = 4;
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Reader hardware configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub bus: u8,
    pub address: u16,
    pub detect_pin: Option<u32>,
    pub wake_pin: Option<u32>,
    pub gpio_root: PathBuf,
    pub timing: Timing,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            bus: DEFAULT_I2C_BUS,
            address: DEFAULT_I2C_ADDRESS,
            detect_pin: Some(DEFAULT_DETECT_PIN),
            wake_pin: None,
            gpio_root: PathBuf::from(DEFAULT_GPIO_ROOT),
            timing: Timing::default(),
        }
    }
}

/// Payload encoding for published events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadFormat {
    /// UID bytes on presented, empty on removed
    #[default]
    Raw,
    /// JSON with hex UID, card type and timestamp
    Json,
}

impl FromStr for PayloadFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// MQTT broker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub presented_topic: String,
    pub removed_topic: String,
    pub payload_format: PayloadFormat,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            presented_topic: "rfid/presented".into(),
            removed_topic: "rfid/removed".into(),
            payload_format: PayloadFormat::Raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub reader: ReaderConfig,
    pub mqtt: MqttConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let reader = ReaderConfig {
            bus: parse(&lookup, "RFID_I2C_BUS")?.unwrap_or(defaults.reader.bus),
            address: match lookup("RFID_I2C_ADDRESS") {
                Some(value) => parse_address(&value)
                    .ok_or(ConfigError::Invalid { var: "RFID_I2C_ADDRESS", value })?,
                None => defaults.reader.address,
            },
            detect_pin: optional_pin(&lookup, "RFID_DETECT_PIN", defaults.reader.detect_pin)?,
            wake_pin: optional_pin(&lookup, "RFID_WAKE_PIN", defaults.reader.wake_pin)?,
            gpio_root: lookup("RFID_GPIO_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.reader.gpio_root),
            timing: Timing {
                settle_delay: parse(&lookup, "RFID_SETTLE_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(SETTLE_DELAY),
                poll_interval: parse(&lookup, "RFID_POLL_INTERVAL_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(POLL_INTERVAL),
                ..defaults.reader.timing
            },
        };

        let mqtt = MqttConfig {
            host: lookup("MQTT_HOST").unwrap_or(defaults.mqtt.host),
            port: parse(&lookup, "MQTT_PORT")?.unwrap_or(defaults.mqtt.port),
            presented_topic: lookup("MQTT_PRESENTED_TOPIC")
                .unwrap_or(defaults.mqtt.presented_topic),
            removed_topic: lookup("MQTT_REMOVED_TOPIC").unwrap_or(defaults.mqtt.removed_topic),
            payload_format: parse(&lookup, "MQTT_PAYLOAD_FORMAT")?
                .unwrap_or(defaults.mqtt.payload_format),
        };

        Ok(Config { reader, mqtt })
    }
}

fn parse<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value })
        })
        .transpose()
}

/// `none` (or an empty value) disables the line.
fn optional_pin<F>(lookup: &F, var: &'static str, default: Option<u32>) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() || value.trim().eq_ignore_ascii_case("none") => {
            Ok(None)
        }
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Decimal or `0x`-prefixed hex, 7-bit.
fn parse_address(value: &str) -> Option<u16> {
    let value = value.trim();
    let address = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok()?,
        None => value.parse().ok()?,
    };
    (address <= 0x7F).then_some(address)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_match_bridge_wiring() {
        let config = load(&[]).unwrap();
        assert_eq!(config.reader.bus, 1);
        assert_eq!(config.reader.address, 0x50);
        assert_eq!(config.reader.detect_pin, Some(4));
        assert_eq!(config.reader.wake_pin, None);
        assert_eq!(config.reader.timing, Timing::default());
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.presented_topic, "rfid/presented");
        assert_eq!(config.mqtt.payload_format, PayloadFormat::Raw);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("RFID_I2C_BUS", "0"),
            ("RFID_I2C_ADDRESS", "0x28"),
            ("RFID_DETECT_PIN", "none"),
            ("RFID_WAKE_PIN", "17"),
            ("RFID_SETTLE_MS", "0"),
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PAYLOAD_FORMAT", "JSON"),
        ])
        .unwrap();

        assert_eq!(config.reader.bus, 0);
        assert_eq!(config.reader.address, 0x28);
        assert_eq!(config.reader.detect_pin, None);
        assert_eq!(config.reader.wake_pin, Some(17));
        assert_eq!(config.reader.timing.settle_delay, Duration::ZERO);
        assert_eq!(config.reader.timing.poll_interval, POLL_INTERVAL);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.payload_format, PayloadFormat::Json);
    }

    #[test]
    fn decimal_address_is_accepted() {
        assert_eq!(load(&[("RFID_I2C_ADDRESS", "80")]).unwrap().reader.address, 0x50);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(load(&[("RFID_I2C_ADDRESS", "0x80")]).is_err());
        assert!(load(&[("RFID_WAKE_PIN", "gpio4")]).is_err());
        assert!(load(&[("MQTT_PAYLOAD_FORMAT", "xml")]).is_err());
        assert!(matches!(
            load(&[("MQTT_PORT", "99999")]),
            Err(ConfigError::Invalid { var: "MQTT_PORT", .. })
        ));
    }
}
