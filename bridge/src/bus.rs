//! Raw byte channel to the reader module.
//!
//! On Linux the module sits behind `/dev/i2c-N`; the slave address is bound
//! once with the `I2C_SLAVE` ioctl, after which plain reads and writes on the
//! file go to that address.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::{ReaderError, Result};

/// I2C_SLAVE from linux/i2c-dev.h
const I2C_SLAVE: u16 = 0x0703;

nix::ioctl_write_int_bad!(i2c_set_slave, I2C_SLAVE);

/// Byte-oriented transport used by the reader session
pub trait Bus {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `max_len` bytes. Short reads are returned as-is.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>>;
}

/// An i2c-dev character device bound to one slave address
#[derive(Debug)]
pub struct I2cDevice {
    file: File,
}

impl I2cDevice {
    pub fn open(bus: u8, address: u16) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/i2c-{bus}"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| ReaderError::DeviceOpen { path, source })?;

        // SAFETY: the fd is owned by `file` and stays open for the call.
        unsafe { i2c_set_slave(file.as_raw_fd(), address.into()) }
            .map_err(|source| ReaderError::AddressBind { bus, address, source })?;

        debug!(bus, address = format_args!("{address:#04x}"), "i2c device bound");
        Ok(Self { file })
    }
}

impl Bus for I2cDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!(?bytes, "i2c write");
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.file.read(&mut buf)?;
        buf.truncate(n);
        trace!(bytes = ?buf, "i2c read");
        Ok(buf)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use super::Bus;
    use crate::error::Result;

    /// Replays canned responses and records every write
    #[derive(Debug, Default)]
    pub struct ScriptedBus {
        pub writes: Vec<Vec<u8>>,
        pub responses: VecDeque<Vec<u8>>,
    }

    impl ScriptedBus {
        pub fn with_responses<I>(responses: I) -> Self
        where
            I: IntoIterator<Item = Vec<u8>>,
        {
            Self {
                writes: Vec::new(),
                responses: responses.into_iter().collect(),
            }
        }
    }

    impl Bus for ScriptedBus {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.writes.push(bytes.to_vec());
            Ok(())
        }

        fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
            let mut raw = self.responses.pop_front().unwrap_or_default();
            raw.truncate(max_len);
            Ok(raw)
        }
    }
}
