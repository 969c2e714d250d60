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

//! Console bridge: shares one serial line between the operator's terminal
//! and image uploads.
//!
//! Operator keystrokes are queued in a [`PendingOutput`] and written to the
//! link whenever it is writable. Everything the target sends is shown to the
//! operator, except that a chunk containing the trigger sequence hands the
//! link to the [`Upload`] until the transfer is over.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::path::Path;
use std::thread;
use std::time::Duration;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use crate::error::{Error, Result};
use crate::link::{Link, SerialLink};
use crate::pending::PendingOutput;
use crate::protocol::find_trigger;
use crate::terminal::Terminal;
use crate::transmitter::{ImageUpload, Upload};

/// Capacity of the pending output buffer and of each device read
pub const BUF_SIZE: usize = 64 * 1024;

/// Pause between attempts to open a device that is not there yet
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Why a listening session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The target closed its side; reconnect.
    DeviceClosed,
    /// The operator's input ended; exit.
    OperatorClosed,
}

fn would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

fn show(display: &mut impl Write, bytes: &[u8]) -> Result<()> {
    display.write_all(bytes).map_err(Error::io("write()"))?;
    display.flush().map_err(Error::io("write()"))
}

// ============================================================================
// Bridge
// ============================================================================

pub struct Bridge<U: Upload> {
    pending: PendingOutput,
    scratch: Box<[u8]>,
    upload: U,
    operator_closed: bool,
    device_closed: bool,
    // Device went away with output still pending; it goes to the next link
    link_lost: bool,
}

impl<U: Upload> Bridge<U> {
    pub fn new(upload: U) -> Self {
        Self::with_capacity(upload, BUF_SIZE)
    }

    pub fn with_capacity(upload: U, capacity: usize) -> Self {
        Bridge {
            pending: PendingOutput::with_capacity(capacity),
            scratch: vec![0; capacity].into_boxed_slice(),
            upload,
            operator_closed: false,
            device_closed: false,
            link_lost: false,
        }
    }

    pub fn wants_operator_input(&self) -> bool {
        !self.operator_closed && !self.device_closed && !self.pending.is_full()
    }

    pub fn wants_link_write(&self) -> bool {
        !self.pending.is_empty()
    }

    /// One side has closed and everything queued has gone out, or the device
    /// can no longer take what is queued.
    pub fn finished(&self) -> bool {
        self.link_lost
            || ((self.operator_closed || self.device_closed) && self.pending.is_empty())
    }

    /// Send as much pending operator input as the link takes.
    ///
    /// If the device has gone, the unsent bytes are kept for the next session.
    pub fn on_link_writable(&mut self, link: &mut dyn Link) -> Result<()> {
        match link.write(self.pending.unsent()) {
            Ok(n) => {
                self.pending.consume(n);
                Ok(())
            }
            Err(e) if would_block(&e) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                log::debug!("Device gone with {} bytes pending", self.pending.len());
                self.device_closed = true;
                self.link_lost = true;
                Ok(())
            }
            Err(source) => Err(Error::Io { op: "write()", source }),
        }
    }

    /// Queue operator input and echo it back.
    pub fn on_operator_input(
        &mut self,
        input: &mut impl Read,
        display: &mut impl Write,
    ) -> Result<()> {
        let spare = self.pending.spare_mut();
        if spare.is_empty() {
            return Ok(());
        }

        match input.read(spare) {
            Ok(0) => {
                log::debug!("Operator input closed");
                self.operator_closed = true;
                Ok(())
            }
            Ok(n) => {
                show(display, &spare[..n])?;
                self.pending.commit(n);
                Ok(())
            }
            Err(e) if would_block(&e) => Ok(()),
            Err(source) => Err(Error::Io { op: "read()", source }),
        }
    }

    /// Show target output, or run the upload if this chunk carries the trigger.
    ///
    /// Bytes after the trigger in the same chunk are dropped.
    pub fn on_link_readable(
        &mut self,
        link: &mut dyn Link,
        display: &mut impl Write,
    ) -> Result<()> {
        let n = match link.read(&mut self.scratch) {
            Ok(n) => n,
            Err(e) if would_block(&e) => return Ok(()),
            Err(source) => return Err(Error::Io { op: "read()", source }),
        };

        if n == 0 {
            log::debug!("Device input closed");
            self.device_closed = true;
            return Ok(());
        }

        let chunk = &self.scratch[..n];
        match find_trigger(chunk) {
            Some(at) => {
                show(display, &chunk[..at])?;
                log::debug!("Received: trigger at offset {} of {}", at, n);
                self.upload.upload(link)
            }
            None => show(display, chunk),
        }
    }

    /// Service the operator and the link until one side closes and the
    /// pending output has drained.
    ///
    /// A hung-up device is reported readable and reads as end of input, which
    /// ends the session with [`SessionEnd::DeviceClosed`].
    pub fn run_session<L, I>(
        &mut self,
        link: &mut L,
        input: &mut I,
        display: &mut impl Write,
    ) -> Result<SessionEnd>
    where
        L: Link + AsFd,
        I: Read + AsFd,
    {
        self.device_closed = false;
        self.link_lost = false;

        while !self.finished() {
            let watch_input = self.wants_operator_input();
            let mut link_events = PollFlags::POLLIN;
            if self.wants_link_write() {
                link_events |= PollFlags::POLLOUT;
            }

            let (link_ready, input_ready) = {
                let mut fds = [
                    PollFd::new(link.as_fd(), link_events),
                    PollFd::new(input.as_fd(), PollFlags::POLLIN),
                ];
                // Input nobody is waiting for stays out of the set
                let watched = if watch_input { fds.len() } else { 1 };
                loop {
                    match poll(&mut fds[..watched], PollTimeout::NONE) {
                        Ok(_) => break,
                        Err(Errno::EINTR) => continue,
                        Err(e) => return Err(Error::Io { op: "poll()", source: e.into() }),
                    }
                }
                let input_ready = if watch_input { fds[1].revents() } else { None };
                (
                    fds[0].revents().unwrap_or(PollFlags::empty()),
                    input_ready.unwrap_or(PollFlags::empty()),
                )
            };

            if input_ready.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                return Err(Error::Poll { source_name: "STDIN" });
            }
            if link_ready.contains(PollFlags::POLLNVAL) {
                return Err(Error::Poll { source_name: "device" });
            }

            let readable = PollFlags::POLLIN | PollFlags::POLLHUP;
            // POLLERR on a tty means it hung up; the read below sees the end
            let link_readable = readable | PollFlags::POLLERR;
            if link_ready.contains(PollFlags::POLLOUT) && self.wants_link_write() {
                self.on_link_writable(link)?;
            }
            if input_ready.intersects(readable) {
                self.on_operator_input(input, display)?;
            }
            if link_ready.intersects(link_readable) {
                self.on_link_readable(link, display)?;
            }
        }

        Ok(if self.operator_closed && !self.link_lost {
            SessionEnd::OperatorClosed
        } else {
            SessionEnd::DeviceClosed
        })
    }
}

// ============================================================================
// Connecting
// ============================================================================

/// Keep calling `open` until it succeeds or fails with a non-transient error.
pub fn connect<L>(
    device: &str,
    retry: Duration,
    mut open: impl FnMut() -> Result<L>,
) -> Result<L> {
    loop {
        match open() {
            Ok(link) => {
                eprintln!("### Listening on {}     ", device);
                return Ok(link);
            }
            Err(e) if e.is_transient() => {
                log::debug!("Open failed: {}", e);
                eprint!("\r### Waiting for {}...\r", device);
                thread::sleep(retry);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bridge the operator's terminal to `device`, uploading `image` whenever the
/// target asks for it. Returns once the operator's input ends.
pub fn run(device: &str, baud_rate: u32, image: &Path) -> Result<()> {
    let mut terminal = Terminal::setup()?;
    let mut display = io::stdout();
    let mut bridge = Bridge::new(ImageUpload::new(image));

    loop {
        let mut link = connect(device, RETRY_INTERVAL, || SerialLink::open(device, baud_rate))?;
        match bridge.run_session(&mut link, &mut terminal, &mut display)? {
            SessionEnd::OperatorClosed => return Ok(()),
            SessionEnd::DeviceClosed => log::info!("{} closed, reopening", device),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
