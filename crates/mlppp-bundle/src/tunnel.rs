//! The bundle's tunnel device.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{BundleError, BundleResult};

/// Highest unit probed when no unit is requested.
pub const MAX_TUN_UNITS: u32 = 256;

/// Packet interface between the bundle and the kernel.
pub trait Tunnel: Read + Write + Debug + Send {
    /// Device name, e.g. `/dev/tun0`.
    fn name(&self) -> &str;

    /// Handle to wait on, if the tunnel has one.
    fn fd(&self) -> Option<BorrowedFd<'_>>;
}

/// A `/dev/tunN` character device.
#[derive(Debug)]
pub struct TunDevice {
    file: File,
    unit: u32,
    name: String,
}

impl TunDevice {
    /// Open `/dev/tun<unit>`, or the first unit that opens when `unit` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Tunnel`] with the last open error when no unit
    /// could be opened.
    pub fn open(unit: Option<u32>) -> BundleResult<Self> {
        Self::open_in(&PathBuf::from("/dev"), unit)
    }

    /// Like [`TunDevice::open`] but probing `dir` instead of `/dev`.
    ///
    /// # Errors
    ///
    /// See [`TunDevice::open`].
    pub fn open_in(dir: &std::path::Path, unit: Option<u32>) -> BundleResult<Self> {
        let candidates = match unit {
            Some(u) => u..=u,
            None => 0..=MAX_TUN_UNITS.saturating_sub(1),
        };
        let mut last = io::Error::new(io::ErrorKind::NotFound, "no tunnel unit available");
        for unit in candidates {
            let path = dir.join(format!("tun{unit}"));
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => {
                    let name = path.display().to_string();
                    info!(device = %name, "using tunnel device");
                    return Ok(Self { file, unit, name });
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(device = %path.display(), "no such tunnel device");
                    last = e;
                    break;
                },
                Err(e) => {
                    debug!(device = %path.display(), error = %e, "tunnel unit busy");
                    last = e;
                },
            }
        }
        Err(BundleError::Tunnel(last))
    }

    /// Unit number.
    #[must_use]
    pub fn unit(&self) -> u32 {
        self.unit
    }
}

impl Read for TunDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for TunDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Tunnel for TunDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.file.as_fd())
    }
}

/// A tunnel that never produces packets and discards everything written.
#[derive(Debug, Default)]
pub struct NullTunnel;

impl Read for NullTunnel {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for NullTunnel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Tunnel for NullTunnel {
    fn name(&self) -> &str {
        "none"
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}
