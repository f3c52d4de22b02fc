//! SL030 reader session: transactions, card select and power control.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::bus::{Bus, I2cDevice};
use crate::config::ReaderConfig;
use crate::error::{ReaderError, Result};
use crate::gpio::{DetectLine, EdgeInput, WakeLine, WAKE_PULSE};
use crate::protocol::{self, commands, status, MAX_RESPONSE_LEN};

/// Time the module needs between a request and its response
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Delay between iterations of the presence loop
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Protocol timing, overridable for tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub wake_pulse: Duration,
}

impl Timing {
    pub const fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            wake_pulse: Duration::ZERO,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_delay: SETTLE_DELAY,
            poll_interval: POLL_INTERVAL,
            wake_pulse: WAKE_PULSE,
        }
    }
}

/// A card returned by SELECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// UID (4 or 7 bytes for MIFARE)
    pub uid: Vec<u8>,
    /// Card type byte trailing the UID
    pub card_type: u8,
}

impl CardInfo {
    /// Split SELECT data: last byte is the type, the rest is the UID.
    pub fn from_select_data(mut data: Vec<u8>) -> Result<Self> {
        let card_type = data.pop().ok_or(ReaderError::MissingCardType)?;
        Ok(Self {
            uid: data,
            card_type,
        })
    }

    pub fn uid_hex(&self) -> String {
        self.uid.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for CardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type {:#04x})", self.uid_hex(), self.card_type)
    }
}

/// Last power command issued. Transactions aren't blocked while sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Idle,
    Sleeping,
}

pub struct ReaderSession<B = I2cDevice> {
    bus: B,
    detect: Option<Box<dyn EdgeInput>>,
    wake: Option<WakeLine>,
    timing: Timing,
    power: PowerState,
}

impl ReaderSession<I2cDevice> {
    /// Open the i2c device and configure whichever GPIO lines are set.
    pub fn open(config: &ReaderConfig) -> Result<Self> {
        let bus = I2cDevice::open(config.bus, config.address)?;
        let detect = config
            .detect_pin
            .map(|pin| DetectLine::configure(&config.gpio_root, pin))
            .transpose()?
            .map(|line| Box::new(line) as Box<dyn EdgeInput>);
        let wake = config
            .wake_pin
            .map(|pin| WakeLine::configure(&config.gpio_root, pin))
            .transpose()?;

        info!(
            bus = config.bus,
            address = format_args!("{:#04x}", config.address),
            detect_pin = ?config.detect_pin,
            wake_pin = ?config.wake_pin,
            "SL030 reader opened"
        );
        Ok(Self::new(bus, detect, wake, config.timing))
    }
}

impl<B: Bus> ReaderSession<B> {
    pub fn new(
        bus: B,
        detect: Option<Box<dyn EdgeInput>>,
        wake: Option<WakeLine>,
        timing: Timing,
    ) -> Self {
        Self {
            bus,
            detect,
            wake,
            timing,
            power: PowerState::Idle,
        }
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn power_state(&self) -> PowerState {
        self.power
    }

    pub fn has_detect_line(&self) -> bool {
        self.detect.is_some()
    }

    #[cfg(test)]
    pub(crate) fn bus(&self) -> &B {
        &self.bus
    }

    /// Send a request without reading a response.
    pub fn write(&mut self, command: u8, data: &[u8]) -> Result<()> {
        let frame = protocol::encode(command, data)?;
        self.bus.write(&frame)
    }

    /// Write a request, wait for the module to settle, read the response.
    ///
    /// Returns the response status and data. The response must echo the
    /// request command.
    pub fn transaction(&mut self, command: u8, data: &[u8]) -> Result<(u8, Vec<u8>)> {
        self.write(command, data)?;
        thread::sleep(self.timing.settle_delay);

        let raw = self.bus.read(MAX_RESPONSE_LEN)?;
        let response = protocol::decode(&raw)?;
        if response.command != command {
            return Err(ReaderError::CommandMismatch {
                sent: command,
                received: response.command,
            });
        }

        trace!(command, status = response.status, data = ?response.data, "transaction");
        Ok((response.status, response.data))
    }

    /// Select the presented card, if any.
    ///
    /// Any non-success status reads as "no card".
    pub fn select(&mut self) -> Result<Option<CardInfo>> {
        let (status, data) = self.transaction(commands::SELECT, &[])?;
        if status != status::SUCCESS {
            trace!(status, "select: no card");
            return Ok(None);
        }
        CardInfo::from_select_data(data).map(Some)
    }

    pub fn sleep(&mut self) -> Result<()> {
        self.write(commands::SLEEP, &[])?;
        self.power = PowerState::Sleeping;
        debug!("reader sent to sleep");
        Ok(())
    }

    pub fn wake(&mut self) -> Result<()> {
        let line = self
            .wake
            .as_mut()
            .ok_or(ReaderError::CapabilityUnavailable("wake"))?;
        line.pulse(self.timing.wake_pulse)?;
        self.power = PowerState::Idle;
        debug!("reader woken");
        Ok(())
    }

    /// Wait for a falling edge on the detect line, then select.
    pub fn poll(&mut self) -> Result<Option<CardInfo>> {
        let line = self
            .detect
            .as_mut()
            .ok_or(ReaderError::CapabilityUnavailable("detect"))?;
        line.drain()?;
        line.wait_edge()?;
        self.select()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::ScriptedBus;
    use crate::gpio::fake::{FakeSysfs, ScriptedEdges};
    use crate::protocol::response_frame;

    fn session(responses: Vec<Vec<u8>>) -> ReaderSession<ScriptedBus> {
        ReaderSession::new(
            ScriptedBus::with_responses(responses),
            None,
            None,
            Timing::immediate(),
        )
    }

    fn with_msb(raw: Vec<u8>) -> Vec<u8> {
        raw.into_iter().map(|b| b | 0x80).collect()
    }

    #[test]
    fn select_returns_uid_and_type() {
        let raw = with_msb(response_frame(
            commands::SELECT,
            status::SUCCESS,
            &[0x01, 0x02, 0x03, 0x04],
        ));
        let mut reader = session(vec![raw]);

        let card = reader.select().unwrap().unwrap();

        assert_eq!(
            card,
            CardInfo {
                uid: vec![1, 2, 3],
                card_type: 4
            }
        );
        assert_eq!(reader.bus().writes, vec![vec![0x01, commands::SELECT]]);
    }

    #[test]
    fn select_without_card_returns_none() {
        let mut reader = session(vec![response_frame(commands::SELECT, 0x01, &[])]);
        assert_eq!(reader.select().unwrap(), None);
    }

    #[test]
    fn select_success_without_data_is_an_error() {
        let mut reader = session(vec![response_frame(commands::SELECT, status::SUCCESS, &[])]);
        assert!(matches!(reader.select(), Err(ReaderError::MissingCardType)));
    }

    #[test]
    fn transaction_rejects_mismatched_command() {
        let mut reader = session(vec![response_frame(0x02, status::SUCCESS, &[0x01, 0x04])]);

        let err = reader.transaction(commands::SELECT, &[]).unwrap_err();

        assert!(matches!(
            err,
            ReaderError::CommandMismatch {
                sent: commands::SELECT,
                received: 0x02
            }
        ));
    }

    #[test]
    fn transaction_surfaces_short_frames() {
        let mut reader = session(vec![vec![0x05, commands::SELECT, status::SUCCESS]]);
        assert!(matches!(
            reader.transaction(commands::SELECT, &[]),
            Err(ReaderError::ShortFrame { .. })
        ));
    }

    #[test]
    fn transaction_forwards_payload() {
        let mut reader = session(vec![response_frame(0x10, status::SUCCESS, &[0x42])]);

        let (status, data) = reader.transaction(0x10, &[0xAA, 0xBB]).unwrap();

        assert_eq!(status, status::SUCCESS);
        assert_eq!(data, vec![0x42]);
        assert_eq!(reader.bus().writes, vec![vec![0x03, 0x10, 0xAA, 0xBB]]);
    }

    #[test]
    fn sleep_writes_without_reading() {
        let mut reader = session(vec![]);

        reader.sleep().unwrap();

        assert_eq!(reader.power_state(), PowerState::Sleeping);
        assert_eq!(reader.bus().writes, vec![vec![0x01, commands::SLEEP]]);
    }

    #[test]
    fn wake_requires_wake_line() {
        let mut reader = session(vec![]);
        assert!(matches!(
            reader.wake(),
            Err(ReaderError::CapabilityUnavailable("wake"))
        ));
    }

    #[test]
    fn poll_requires_detect_line() {
        let mut reader = session(vec![]);
        assert!(matches!(
            reader.poll(),
            Err(ReaderError::CapabilityUnavailable("detect"))
        ));
    }

    #[test]
    fn poll_drains_and_waits_before_selecting() {
        let edges = ScriptedEdges::new(1);
        let raw = response_frame(commands::SELECT, status::SUCCESS, &[0x0A, 0x0B, 0x02]);
        let mut reader = ReaderSession::new(
            ScriptedBus::with_responses([raw]),
            Some(Box::new(edges.clone())),
            None,
            Timing::immediate(),
        );

        let card = reader.poll().unwrap();

        assert_eq!(edges.calls(), vec!["drain", "wait"]);
        assert_eq!(
            card,
            Some(CardInfo {
                uid: vec![0x0A, 0x0B],
                card_type: 0x02
            })
        );
        assert_eq!(reader.bus().writes, vec![vec![0x01, commands::SELECT]]);
    }

    #[test]
    fn failed_edge_wait_skips_select() {
        let mut reader = ReaderSession::new(
            ScriptedBus::default(),
            Some(Box::new(ScriptedEdges::new(0))),
            None,
            Timing::immediate(),
        );

        assert!(matches!(
            reader.poll(),
            Err(ReaderError::Gpio { action: "wait for edge", .. })
        ));
        assert!(reader.bus().writes.is_empty());
    }

    #[test]
    fn wake_pulses_line_and_returns_to_idle() {
        let sysfs = FakeSysfs::new();
        sysfs.add_pin(27, "0");
        let wake = WakeLine::configure(&sysfs.root, 27).unwrap();
        let mut reader = ReaderSession::new(
            ScriptedBus::default(),
            None,
            Some(wake),
            Timing::immediate(),
        );

        reader.sleep().unwrap();
        reader.wake().unwrap();

        assert_eq!(reader.power_state(), PowerState::Idle);
        assert_eq!(sysfs.read("gpio27/value"), "0");
    }

    #[test]
    fn card_info_formats_uid_as_hex() {
        let card = CardInfo {
            uid: vec![0xDE, 0xAD, 0x0B],
            card_type: 0x01,
        };
        assert_eq!(card.uid_hex(), "dead0b");
        assert_eq!(card.to_string(), "dead0b (type 0x01)");
    }
}
