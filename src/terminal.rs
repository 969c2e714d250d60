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

use std::io::{self, IsTerminal, Read, Stdin};
use std::os::fd::{AsFd, BorrowedFd};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, Termios};
use crate::error::{Error, Result};

/// The operator's side: non-blocking stdin with line buffering and echo off.
///
/// Whatever was changed is put back when this is dropped, so it must outlive
/// every exit path of the console loop.
pub struct Terminal {
    stdin: Stdin,
    saved_flags: OFlag,
    saved_termios: Option<Termios>,
}

impl Terminal {
    pub fn setup() -> Result<Self> {
        let stdin = io::stdin();

        let bits = fcntl(&stdin, FcntlArg::F_GETFL)
            .map_err(|e| Error::Io { op: "fcntl()", source: e.into() })?;
        let saved_flags = OFlag::from_bits_truncate(bits);
        fcntl(&stdin, FcntlArg::F_SETFL(saved_flags | OFlag::O_NONBLOCK))
            .map_err(|e| Error::Io { op: "fcntl()", source: e.into() })?;

        let mut terminal = Terminal { stdin, saved_flags, saved_termios: None };

        if terminal.stdin.is_terminal() {
            let saved = tcgetattr(&terminal.stdin)
                .map_err(|e| Error::Io { op: "tcgetattr()", source: e.into() })?;

            let mut raw = saved.clone();
            raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);

            // Saved before setting so a failure below still restores
            terminal.saved_termios = Some(saved);
            tcsetattr(&terminal.stdin, SetArg::TCSANOW, &raw)
                .map_err(|e| Error::Io { op: "tcsetattr()", source: e.into() })?;
        }

        Ok(terminal)
    }
}

impl Read for Terminal {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Bypass Stdin's internal buffer so poll readiness stays accurate
        nix::unistd::read(&self.stdin, buf).map_err(io::Error::from)
    }
}

impl AsFd for Terminal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stdin.as_fd()
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if let Some(saved) = self.saved_termios.take() {
            if let Err(e) = tcsetattr(&self.stdin, SetArg::TCSANOW, &saved) {
                log::warn!("Failed to restore terminal settings: {}", e);
            }
        }
        if let Err(e) = fcntl(&self.stdin, FcntlArg::F_SETFL(self.saved_flags)) {
            log::warn!("Failed to restore stdin flags: {}", e);
        }
    }
}
