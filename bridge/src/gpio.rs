//! Sysfs GPIO lines.
//!
//! Two lines hang off the reader module:
//! - DETECT: input, falling edge when the card state changes
//! - WAKE: output, pulsed to bring the module out of sleep
//!
//! Layout under the sysfs root (normally `/sys/class/gpio`):
//! - `export` - write the pin number to create `gpioN/`
//! - `gpioN/direction` - `in` / `out`
//! - `gpioN/edge` - `falling` (inputs only)
//! - `gpioN/value` - `0` / `1`

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace, warn};

use crate::error::{ReaderError, Result};

/// Width of the wake pulse
pub const WAKE_PULSE: Duration = Duration::from_millis(100);

fn gpio_err(pin: u32, action: &'static str) -> impl FnOnce(std::io::Error) -> ReaderError {
    move |source| ReaderError::Gpio { pin, action, source }
}

/// Export `pin` through `<root>/export`.
///
/// Fails harmlessly when the pin was already exported, so callers log the
/// error and carry on.
pub fn export(root: &Path, pin: u32) -> Result<()> {
    let mut export = OpenOptions::new()
        .write(true)
        .open(root.join("export"))
        .map_err(gpio_err(pin, "open export"))?;
    export
        .write_all(pin.to_string().as_bytes())
        .map_err(gpio_err(pin, "export"))?;
    Ok(())
}

fn export_best_effort(root: &Path, pin: u32) {
    if let Err(e) = export(root, pin) {
        warn!(pin, error = %e, "couldn't export gpio, assuming it already is");
    }
}

fn pin_dir(root: &Path, pin: u32) -> PathBuf {
    root.join(format!("gpio{pin}"))
}

/// Source of card-change edges
pub trait EdgeInput: Send {
    /// Read and discard the current level, re-arming edge detection.
    fn drain(&mut self) -> Result<()>;

    /// Block until the next edge. No timeout.
    fn wait_edge(&mut self) -> Result<()>;
}

/// Input line signalling card presence changes
#[derive(Debug)]
pub struct DetectLine {
    pin: u32,
    value: File,
}

impl DetectLine {
    pub fn configure(root: &Path, pin: u32) -> Result<Self> {
        export_best_effort(root, pin);

        let dir = pin_dir(root, pin);
        fs::write(dir.join("direction"), "in").map_err(gpio_err(pin, "set direction"))?;
        fs::write(dir.join("edge"), "falling").map_err(gpio_err(pin, "set edge"))?;
        let value = File::open(dir.join("value")).map_err(gpio_err(pin, "open value"))?;

        debug!(pin, "detect line configured");
        Ok(Self { pin, value })
    }

    /// Current level as sysfs reports it, e.g. `"1\n"`.
    pub fn read_level(&mut self) -> Result<String> {
        let mut level = String::new();
        self.value.rewind().map_err(gpio_err(self.pin, "rewind value"))?;
        self.value
            .read_to_string(&mut level)
            .map_err(gpio_err(self.pin, "read value"))?;
        Ok(level)
    }
}

impl EdgeInput for DetectLine {
    fn drain(&mut self) -> Result<()> {
        let level = self.read_level()?;
        trace!(pin = self.pin, level = level.trim(), "detect line drained");
        Ok(())
    }

    fn wait_edge(&mut self) -> Result<()> {
        let mut fds = [PollFd::new(
            self.value.as_fd(),
            PollFlags::POLLPRI | PollFlags::POLLERR,
        )];
        poll(&mut fds, PollTimeout::NONE).map_err(|errno| ReaderError::Gpio {
            pin: self.pin,
            action: "wait for edge",
            source: errno.into(),
        })?;
        Ok(())
    }
}

/// Output line driving the module's wake input
#[derive(Debug)]
pub struct WakeLine {
    pin: u32,
    value: File,
}

impl WakeLine {
    /// Configure the pin as an output. The line is left high.
    pub fn configure(root: &Path, pin: u32) -> Result<Self> {
        export_best_effort(root, pin);

        let dir = pin_dir(root, pin);
        fs::write(dir.join("direction"), "out").map_err(gpio_err(pin, "set direction"))?;
        let value = OpenOptions::new()
            .write(true)
            .open(dir.join("value"))
            .map_err(gpio_err(pin, "open value"))?;

        let mut line = Self { pin, value };
        line.set(true)?;
        debug!(pin, "wake line configured");
        Ok(line)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn set(&mut self, high: bool) -> Result<()> {
        let level: &[u8] = if high { b"1" } else { b"0" };
        self.value.rewind().map_err(gpio_err(self.pin, "rewind value"))?;
        self.value
            .write_all(level)
            .map_err(gpio_err(self.pin, "write value"))?;
        Ok(())
    }

    /// Drive high, hold for `width`, drive low.
    pub fn pulse(&mut self, width: Duration) -> Result<()> {
        self.set(true)?;
        thread::sleep(width);
        self.set(false)
    }
}
