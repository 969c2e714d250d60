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

/// Operator bytes waiting to go out on the link.
///
/// Bytes are appended at `end` and sent from `start`. When everything is sent
/// both indices go back to zero; when the buffer has filled up, the unsent
/// tail is moved to the front to make room again.
pub struct PendingOutput {
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl PendingOutput {
    pub fn with_capacity(capacity: usize) -> Self {
        PendingOutput {
            buf: vec![0; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// No room left to append, even though some of it may be sent already.
    pub fn is_full(&self) -> bool {
        self.end == self.buf.len()
    }

    /// Bytes not yet sent.
    pub fn unsent(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Free space after the last appended byte.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.end..]
    }

    /// Mark `n` bytes written into [`spare_mut`](Self::spare_mut) as appended.
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.buf.len() - self.end, "commit past capacity");
        self.end += n;
    }

    /// Drop `n` bytes from the front after they were sent.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consumed more than was pending");
        self.start += n;

        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }

        if self.end == self.buf.len() {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
