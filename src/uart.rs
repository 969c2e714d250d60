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

// ============================================================================
// Uart Trait
// ============================================================================

/// Blocking byte UART as seen by the boot receiver on the target.
///
/// `getc` blocks until a byte arrives. There is no timeout: a host that never
/// answers leaves the target waiting forever.
pub trait Uart {
    fn init(&mut self);

    fn getc(&mut self) -> u8;

    fn putc(&mut self, byte: u8);

    fn puts(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.putc(byte);
        }
    }

    /// Shut the peripheral down so the loaded image starts with a quiet line.
    fn deinit(&mut self);
}

// ============================================================================
// Mock Uart for Testing
// ============================================================================

#[cfg(test)]
pub struct MockUart {
    // Bytes handed out by getc, in order
    input: Vec<u8>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    pub initialized: bool,
    pub deinitialized: bool,
    must_deinit: bool,
}

#[cfg(test)]
impl MockUart {
    pub fn new(input: Vec<u8>, expected_writes: Vec<u8>) -> Self {
        MockUart {
            input,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            initialized: false,
            deinitialized: false,
            must_deinit: false,
        }
    }

    /// Fail on drop unless `deinit` was called.
    pub fn expect_deinit(mut self) -> Self {
        self.must_deinit = true;
        self
    }

    pub fn written(&self) -> &[u8] {
        &self.write_log
    }
}

#[cfg(test)]
impl Uart for MockUart {
    fn init(&mut self) {
        self.initialized = true;
    }

    fn getc(&mut self) -> u8 {
        // A real UART would block forever here
        assert!(
            self.read_pos < self.input.len(),
            "MockUart read past end of script ({} bytes scripted)",
            self.input.len()
        );
        let byte = self.input[self.read_pos];
        self.read_pos += 1;
        byte
    }

    fn putc(&mut self, byte: u8) {
        assert!(!self.deinitialized, "MockUart written after deinit");
        self.write_log.push(byte);
    }

    fn deinit(&mut self) {
        self.deinitialized = true;
    }
}

#[cfg(test)]
impl Drop for MockUart {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            !self.must_deinit || self.deinitialized,
            "MockUart dropped without deinit"
        );

        assert_eq!(
            self.read_pos,
            self.input.len(),
            "MockUart dropped with {} unconsumed bytes (read {} of {} bytes)",
            self.input.len() - self.read_pos,
            self.read_pos,
            self.input.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockUart write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
