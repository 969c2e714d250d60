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

//! Target-side boot receiver.
//!
//! Runs once at boot: greet, ask the host for an image with the trigger
//! sequence, check the announced length against the load region, copy the
//! payload in and hand control to it. Every receive blocks without a timeout,
//! so a host that goes away mid-transfer leaves the target hanging until it
//! is power-cycled.

use core::marker::PhantomData;
use crate::diag::print_num;
use crate::protocol::*;
use crate::uart::Uart;

const GREETING_HEAD: &[u8] =
    concat!("\n\nRaspbootin V", env!("CARGO_PKG_VERSION"), " (").as_bytes();
const GREETING_TAIL: &[u8] = b")\n\n";
const BOOTING: &[u8] = b"booting your kernel...\n\n";
const TOO_BIG: &[u8] = b"The kernel is too big: ";

// ============================================================================
// Board Description
// ============================================================================

/// Description of the board the receiver runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    pub model: &'static str,
    /// Where the SoC maps its peripherals; `Uart` drivers find their
    /// registers through [`Board::peripheral`].
    pub peripheral_base: usize,
    pub load_base: usize,
    /// First address past the usable load region
    pub load_ceiling: usize,
}

impl Board {
    pub const RASPBERRY_PI_2: Board = Board {
        model: "Raspberry Pi 2 Model B",
        peripheral_base: 0x3F00_0000,
        load_base: LOAD_BASE,
        load_ceiling: LOAD_CEILING,
    };

    /// Address of the peripheral register block at `offset`.
    pub const fn peripheral(&self, offset: usize) -> usize {
        self.peripheral_base + offset
    }

    pub fn load_capacity(&self) -> usize {
        self.load_ceiling.saturating_sub(self.load_base)
    }

    /// Borrow the board's load region as raw memory.
    ///
    /// # Safety
    ///
    /// `load_base..load_ceiling` must be writable RAM that nothing else uses
    /// for as long as the region lives, the receiver's own code and stack
    /// included.
    pub unsafe fn load_region<'a>(&self) -> LoadRegion<'a> {
        let memory = unsafe {
            core::slice::from_raw_parts_mut(self.load_base as *mut u8, self.load_capacity())
        };
        LoadRegion::new(self.load_base, memory)
    }
}

// ============================================================================
// Load Region
// ============================================================================

/// Destination of the payload: a base address plus the memory behind it.
pub struct LoadRegion<'a> {
    base: usize,
    memory: &'a mut [u8],
}

impl<'a> LoadRegion<'a> {
    pub fn new(base: usize, memory: &'a mut [u8]) -> Self {
        LoadRegion { base, memory }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Whether `length` bytes starting at the base stay inside the region.
    pub fn fits(&self, length: u32) -> bool {
        usize::try_from(length).is_ok_and(|len| len <= self.memory.len())
    }
}

// ============================================================================
// Hand-off
// ============================================================================

/// Registers the receiver was entered with, passed on unchanged to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootArgs {
    pub r0: u32,
    pub r1: u32,
    pub atags: usize,
}

/// Where control goes once the image is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub entry: usize,
    pub length: u32,
    pub args: BootArgs,
}

type EntryFn = extern "C" fn(r0: u32, r1: u32, atags: usize) -> !;

impl Handoff {
    /// Call into the loaded image.
    ///
    /// # Safety
    ///
    /// `entry` must hold a complete image built for this address and ABI.
    pub unsafe fn jump(self) -> ! {
        let entry: EntryFn = unsafe { core::mem::transmute::<usize, EntryFn>(self.entry) };
        entry(self.args.r0, self.args.r1, self.args.atags)
    }
}

/// The announced length does not fit the load region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub length: u32,
}

/// Spin forever. The board has to be power-cycled.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ============================================================================
// States
// ============================================================================

pub struct Idle;
pub struct AwaitingHandshake;
pub struct Receiving;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct Receiver<'a, U: Uart, State> {
    state: PhantomData<State>,
    uart: U,
    board: &'a Board,
    region: LoadRegion<'a>,
    args: BootArgs,
    length: u32,
}

impl<'a, U: Uart, S> Receiver<'a, U, S> {
    fn transition<T>(self) -> Receiver<'a, U, T> {
        Receiver {
            state: PhantomData,
            uart: self.uart,
            board: self.board,
            region: self.region,
            args: self.args,
            length: self.length,
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a, U: Uart> Receiver<'a, U, Idle> {
    pub fn new(uart: U, board: &'a Board, region: LoadRegion<'a>, args: BootArgs) -> Self {
        Receiver {
            state: PhantomData,
            uart,
            board,
            region,
            args,
            length: 0,
        }
    }

    /// Bring the UART up, greet, and send the trigger.
    pub fn request_upload(mut self) -> Receiver<'a, U, AwaitingHandshake> {
        self.uart.init();
        self.uart.puts(GREETING_HEAD);
        self.uart.puts(self.board.model.as_bytes());
        self.uart.puts(GREETING_TAIL);
        self.uart.puts(&TRIGGER);
        self.transition()
    }
}

impl<'a, U: Uart> Receiver<'a, U, AwaitingHandshake> {
    /// Read the transfer header and answer it.
    ///
    /// On rejection the reply and a diagnostic have already gone out; the
    /// caller is expected to [`halt`].
    pub fn negotiate(mut self) -> Result<Receiver<'a, U, Receiving>, Rejected> {
        let mut header = [0u8; HEADER_LEN];
        for byte in header.iter_mut() {
            *byte = self.uart.getc();
        }
        let length = decode_header(header);

        if !self.region.fits(length) {
            self.uart.puts(&REJECT);
            self.uart.puts(TOO_BIG);
            print_num(&mut self.uart, 10, u64::from(length));
            self.uart.putc(b'\n');
            return Err(Rejected { length });
        }

        self.uart.puts(&ACCEPT);
        self.length = length;
        Ok(self.transition())
    }
}

impl<'a, U: Uart> Receiver<'a, U, Receiving> {
    /// Copy the payload into the load region and shut the UART down.
    pub fn receive(mut self) -> Handoff {
        // Length was checked in negotiate; this is the only bounds check.
        let dest = &mut self.region.memory[..self.length as usize];
        for slot in dest.iter_mut() {
            *slot = self.uart.getc();
        }

        self.uart.puts(BOOTING);
        self.uart.deinit();

        Handoff {
            entry: self.region.base,
            length: self.length,
            args: self.args,
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Run the whole receive sequence. Never returns on a rejected length.
pub fn boot<'a, U: Uart>(
    uart: U,
    board: &'a Board,
    region: LoadRegion<'a>,
    args: BootArgs,
) -> Handoff {
    let receiver = Receiver::new(uart, board, region, args).request_upload();
    match receiver.negotiate() {
        Ok(receiver) => receiver.receive(),
        Err(_) => halt(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::MockUart;

    const BOARD: Board = Board {
        model: "test board",
        peripheral_base: 0x2000_0000,
        load_base: 0x8000,
        load_ceiling: 0x8000 + 64,
    };

    fn greeting(board: &Board) -> Vec<u8> {
        let mut out = GREETING_HEAD.to_vec();
        out.extend_from_slice(board.model.as_bytes());
        out.extend_from_slice(GREETING_TAIL);
        out.extend_from_slice(&TRIGGER);
        out
    }

    #[test]
    fn test_board_peripheral_address() {
        // PL011 UART0 sits 0x20_1000 into the peripheral block
        assert_eq!(Board::RASPBERRY_PI_2.peripheral(0x20_1000), 0x3F20_1000);
        assert_eq!(BOARD.peripheral(0x20_1000), 0x2020_1000);
    }

    #[test]
    fn test_board_capacity() {
        assert_eq!(BOARD.load_capacity(), 64);
        assert_eq!(Board::RASPBERRY_PI_2.load_capacity(), 0x100_0000 - 0x8000);
    }

    #[test]
    fn test_region_fits() {
        let mut memory = [0u8; 16];
        let region = LoadRegion::new(0x8000, &mut memory);
        assert!(region.fits(0));
        assert!(region.fits(16));
        assert!(!region.fits(17));
        assert!(!region.fits(u32::MAX));
    }

    #[test]
    fn test_request_upload_greets_and_triggers() {
        let mut memory = [0u8; 64];
        let uart = MockUart::new(Vec::new(), greeting(&BOARD));
        let region = LoadRegion::new(0x8000, &mut memory);
        let receiver = Receiver::new(uart, &BOARD, region, BootArgs::default()).request_upload();
        assert!(receiver.uart.initialized);
        assert!(receiver.uart.written().ends_with(&TRIGGER));
    }

    #[test]
    fn test_receive_every_length_up_to_capacity() {
        for len in 0..=64u32 {
            let payload: Vec<u8> = (0..len)
                .map(|i| (i as u8).wrapping_mul(7).wrapping_add(1))
                .collect();

            let mut input = encode_header(len).to_vec();
            input.extend_from_slice(&payload);

            let mut expected = greeting(&BOARD);
            expected.extend_from_slice(&ACCEPT);
            expected.extend_from_slice(BOOTING);

            let mut memory = [0xEEu8; 64];
            let args = BootArgs { r0: 0, r1: 0xC42, atags: 0x100 };
            let handoff = boot(
                MockUart::new(input, expected).expect_deinit(),
                &BOARD,
                LoadRegion::new(BOARD.load_base, &mut memory),
                args,
            );

            assert_eq!(handoff, Handoff { entry: 0x8000, length: len, args });
            assert_eq!(&memory[..len as usize], &payload[..]);
            assert!(memory[len as usize..].iter().all(|&b| b == 0xEE));
        }
    }

    #[test]
    fn test_accept_precedes_payload() {
        let mut memory = [0u8; 64];
        let mut expected = greeting(&BOARD);
        expected.extend_from_slice(&ACCEPT);

        // Header only: negotiating must not touch the payload
        let uart = MockUart::new(encode_header(3).to_vec(), expected);
        let region = LoadRegion::new(0x8000, &mut memory);
        let receiver = Receiver::new(uart, &BOARD, region, BootArgs::default())
            .request_upload()
            .negotiate()
            .expect("length fits");
        assert_eq!(receiver.length, 3);
    }

    #[test]
    fn test_reject_oversized_length() {
        for len in [65u32, 0x20_0000, u32::MAX] {
            let mut expected = greeting(&BOARD);
            expected.extend_from_slice(&REJECT);
            expected.extend_from_slice(TOO_BIG);
            expected.extend_from_slice(len.to_string().as_bytes());
            expected.push(b'\n');

            // Only the header is scripted; reading a payload byte would panic
            let mut memory = [0u8; 64];
            let uart = MockUart::new(encode_header(len).to_vec(), expected);
            let region = LoadRegion::new(0x8000, &mut memory);
            let result = Receiver::new(uart, &BOARD, region, BootArgs::default())
                .request_upload()
                .negotiate();

            assert_eq!(result.err(), Some(Rejected { length: len }));
            assert!(memory.iter().all(|&b| b == 0));
        }
    }
}
