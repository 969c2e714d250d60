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

//! Allocation-free number output for the target

use crate::uart::Uart;

const DIGITS: &[u8; 16] = b"0123456789abcdef";

// u64::MAX is 22 digits in octal
const MAX_DIGITS: usize = 32;

/// Write `num` to the UART in base 8, 10 or 16. Any other base writes nothing.
pub fn print_num<U: Uart + ?Sized>(uart: &mut U, base: u8, num: u64) {
    let mut buf = [0u8; MAX_DIGITS];
    let Some(len) = digits_reversed(base, num, &mut buf) else {
        return;
    };

    for &digit in buf[..len].iter().rev() {
        uart.putc(digit);
    }
}

/// Fill `buf` least-significant digit first and return the digit count.
fn digits_reversed(base: u8, mut num: u64, buf: &mut [u8; MAX_DIGITS]) -> Option<usize> {
    let radix = match base {
        8 | 10 | 16 => u64::from(base),
        _ => return None,
    };

    // always runs once so zero prints as "0"
    let mut len = 0;
    loop {
        buf[len] = DIGITS[(num % radix) as usize];
        len += 1;
        num /= radix;
        if num == 0 {
            break;
        }
    }

    Some(len)
}

// ============================================================================
// Tests
// ============================================================================
