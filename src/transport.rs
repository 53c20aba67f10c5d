/*
 * This file is part of Acerfan.
 *
 * Copyright (C) 2025 Acerfan contributors
 *
 * Acerfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Acerfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Acerfan. If not, see <https://www.gnu.org/licenses/>.
 */

//! Raw byte access to 16-bit I/O port addresses.
//!
//! The EC register interface only needs `read_port` / `write_port` and an
//! availability check. On Linux the ports are reached through `/dev/port`,
//! which needs root (CAP_SYS_RAWIO). When the device cannot be opened the
//! [`UnavailablePort`] backend is used instead and the rest of the program runs
//! in degraded mode.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{AcerfanError, Result};

pub const DEV_PORT_PATH: &str = "/dev/port";

#[cfg_attr(test, mockall::automock)]
pub trait PortTransport {
    /// Whether the port device was opened and can be used
    fn is_available(&self) -> bool;
    fn read_port(&mut self, addr: u16) -> io::Result<u8>;
    fn write_port(&mut self, addr: u16, value: u8) -> io::Result<()>;
}

impl<T: PortTransport + ?Sized> PortTransport for Box<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn read_port(&mut self, addr: u16) -> io::Result<u8> {
        (**self).read_port(addr)
    }

    fn write_port(&mut self, addr: u16, value: u8) -> io::Result<()> {
        (**self).write_port(addr, value)
    }
}

/// Port access through the `/dev/port` character device.
///
/// The file offset is the port number. The handle is closed when the value is
/// dropped.
#[derive(Debug)]
pub struct DevPort {
    path: PathBuf,
    file: File,
}

impl DevPort {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| AcerfanError::TransportOpen { path: path.clone(), source })?;
        debug!("Opened port device {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PortTransport for DevPort {
    fn is_available(&self) -> bool {
        true
    }

    fn read_port(&mut self, addr: u16) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        let n = self.file.read_at(&mut buf, u64::from(addr))?;
        if n != 1 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short port read"));
        }
        Ok(buf[0])
    }

    fn write_port(&mut self, addr: u16, value: u8) -> io::Result<()> {
        let n = self.file.write_at(&[value], u64::from(addr))?;
        if n != 1 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short port write"));
        }
        Ok(())
    }
}

/// Stand-in used when no port driver is present.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailablePort;

impl PortTransport for UnavailablePort {
    fn is_available(&self) -> bool {
        false
    }

    fn read_port(&mut self, _addr: u16) -> io::Result<u8> {
        Ok(0)
    }

    fn write_port(&mut self, _addr: u16, _value: u8) -> io::Result<()> {
        Ok(())
    }
}

/// Open the port device, falling back to [`UnavailablePort`] on failure.
pub fn open_or_unavailable(path: impl AsRef<Path>) -> Box<dyn PortTransport> {
    match DevPort::open(path) {
        Ok(port) => Box::new(port),
        Err(e) => {
            warn!("{e}; continuing without EC access");
            Box::new(UnavailablePort)
        }
    }
}
