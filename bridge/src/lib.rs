//! Driver for the SL030 contactless card reader on a Linux i2c bus, plus
//! the presence loop that turns card reads into presented/removed events.
//!
//! Hardware connection (Raspberry Pi defaults):
//! - SDA/SCL  -> i2c bus 1, module address 0x50
//! - OUT      -> GPIO 4 (DETECT, falling edge on card change)
//! - optional -> WAKE input driven from any free GPIO

pub mod bus;
pub mod config;
pub mod error;
pub mod gpio;
pub mod mqtt;
pub mod presence;
pub mod protocol;
pub mod session;

pub use crate::config::{Config, MqttConfig, PayloadFormat, ReaderConfig};
pub use crate::error::{ReaderError, Result};
pub use crate::presence::{EventSink, Poller, PresenceEvent, PresenceTracker};
pub use crate::session::{CardInfo, PowerState, ReaderSession, Timing};
