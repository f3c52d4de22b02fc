use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReaderError>;

/// Errors raised by the reader driver
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("couldn't open bus device {path}: {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't set slave address {address:#04x} on i2c bus {bus}: {source}")]
    AddressBind {
        bus: u8,
        address: u16,
        #[source]
        source: nix::Error,
    },

    #[error("bus i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("gpio {pin}: couldn't {action}: {source}")]
    Gpio {
        pin: u32,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} line is not configured")]
    CapabilityUnavailable(&'static str),

    #[error("payload of {0} bytes doesn't fit in a frame (max 254)")]
    PayloadTooLarge(usize),

    #[error("short frame: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },

    #[error("response to command {received:#04x} while waiting for {sent:#04x}")]
    CommandMismatch { sent: u8, received: u8 },

    #[error("select succeeded but returned no card type byte")]
    MissingCardType,

    #[error("presence event sink closed")]
    SinkClosed,
}
