// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::Duration;
use nix::errno::Errno;
use serialport::{DataBits, FlowControl, Parity, SerialPort as _, StopBits, TTYPort};
use crate::error::{Error, Result};

/// How long a blocking call waits before polling the device again
const BLOCKING_POLL: Duration = Duration::from_secs(1);

/// A hung-up tty shows up as `POLLHUP` (`BrokenPipe`) or as `EIO`, which
/// serialport passes on as `Other` with the errno text.
fn hung_up(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::BrokenPipe => true,
        io::ErrorKind::Other => e.to_string() == Errno::EIO.desc(),
        _ => false,
    }
}

// ============================================================================
// Link Trait
// ============================================================================

/// Raw full-duplex byte channel to the target.
///
/// Non-blocking by default: `read` and `write` return `WouldBlock` when the
/// device is not ready. A read of zero bytes means the target side is gone;
/// a write to a device that has gone fails with `BrokenPipe`.
pub trait Link {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;

    /// Write every byte, retrying partial writes.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Fill `buf` completely, retrying partial reads.
    fn read_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => buf = &mut buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Serial Device Implementation
// ============================================================================

/// Serial device configured 8N1, no flow control, raw, polling reads.
pub struct SerialLink {
    port: TTYPort,
    blocking: bool,
}

impl SerialLink {
    pub fn open(device: &str, baud_rate: u32) -> Result<Self> {
        let builder = serialport::new(device, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::ZERO);

        let port = TTYPort::open(&builder).map_err(|source| Error::Open {
            device: device.to_string(),
            source,
        })?;

        log::debug!("Opened {} at {} baud", device, baud_rate);
        Ok(SerialLink { port, blocking: false })
    }
}

impl Link for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.port.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if !self.blocking {
                        return Err(io::ErrorKind::WouldBlock.into());
                    }
                }
                // Hang-up from the device is end of input
                Err(e) if hung_up(&e) => return Ok(0),
                other => return other,
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.port.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if !self.blocking {
                        return Err(io::ErrorKind::WouldBlock.into());
                    }
                }
                Err(e) if hung_up(&e) => return Err(io::ErrorKind::BrokenPipe.into()),
                other => return other,
            }
        }
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        let timeout = if blocking { BLOCKING_POLL } else { Duration::ZERO };
        self.port.set_timeout(timeout).map_err(io::Error::from)?;
        self.blocking = blocking;
        Ok(())
    }
}

impl AsFd for SerialLink {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor is owned by `port` and outlives the borrow.
        unsafe { BorrowedFd::borrow_raw(self.port.as_raw_fd()) }
    }
}

// ============================================================================
// Mock Link for Testing
// ============================================================================

#[cfg(test)]
pub struct MockLink {
    // One entry per read call (None = would block, empty chunk = closed)
    reads: Vec<Option<Vec<u8>>>,
    read_pos: usize,
    // Bytes of the current chunk already handed out
    chunk_pos: usize,
    // Largest write accepted in one call
    write_limit: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    pub blocking: bool,
    pub mode_changes: Vec<bool>,
}

#[cfg(test)]
impl MockLink {
    pub fn new(reads: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> Self {
        MockLink {
            reads,
            read_pos: 0,
            chunk_pos: 0,
            write_limit: usize::MAX,
            write_log: Vec::new(),
            expected_writes,
            blocking: false,
            mode_changes: Vec::new(),
        }
    }

    /// Accept at most `limit` bytes per write call.
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }
}

#[cfg(test)]
impl Link for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(entry) = self.reads.get(self.read_pos) else {
            return Err(io::ErrorKind::WouldBlock.into());
        };

        let Some(chunk) = entry else {
            self.read_pos += 1;
            return Err(io::ErrorKind::WouldBlock.into());
        };

        let remaining = &chunk[self.chunk_pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.chunk_pos += n;

        if self.chunk_pos >= chunk.len() {
            self.read_pos += 1;
            self.chunk_pos = 0;
        }

        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.write_limit);
        self.write_log.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.blocking = blocking;
        self.mode_changes.push(blocking);
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockLink {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.reads.len(),
            "MockLink dropped with {} unconsumed reads (read {} of {})",
            self.reads.len() - self.read_pos,
            self.read_pos,
            self.reads.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockLink write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

/// Open a pseudo-terminal and return its master with the device path of the
/// slave side, for driving a real `SerialLink` in tests.
#[cfg(test)]
pub fn open_pty() -> (std::os::fd::OwnedFd, String) {
    let pty = nix::pty::openpty(None, None).expect("openpty");
    let path = nix::unistd::ttyname(&pty.slave).expect("ttyname");
    (pty.master, path.to_string_lossy().into_owned())
}

// ============================================================================
// Tests
// ============================================================================
