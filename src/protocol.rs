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

//! Raspboot wire protocol constants
//!
//! The target prints ordinary boot-log text until it wants an image. It then
//! sends [`TRIGGER`], the host answers with a [`HEADER_LEN`]-byte little-endian
//! length, the target replies [`ACCEPT`] or [`REJECT`], and on accept the host
//! streams exactly that many raw bytes. There is no checksum and no
//! per-chunk acknowledgement.

/// Break character - the target's "request to upload" byte
pub const BREAK: u8 = 0x03;

/// Trigger sequence - three contiguous breaks
pub const TRIGGER: [u8; 3] = [BREAK; 3];

/// Size of the little-endian length prefix
pub const HEADER_LEN: usize = 4;

/// Size of the handshake reply
pub const REPLY_LEN: usize = 2;

/// Accept - receiver will take the announced length
pub const ACCEPT: [u8; REPLY_LEN] = *b"OK";

/// Reject - announced length would overflow the load region
pub const REJECT: [u8; REPLY_LEN] = *b"SE";

/// Largest image the host is willing to send (2 MiB)
pub const MAX_IMAGE_SIZE: u64 = 0x20_0000;

/// Default load address on the target
pub const LOAD_BASE: usize = 0x8000;

/// Default ceiling of the target load region; `LOAD_BASE + length` may not exceed it
pub const LOAD_CEILING: usize = 0x100_0000;

/// Fixed line speed
pub const BAUD_RATE: u32 = 115_200;

/// Encode an image length as a transfer header.
pub fn encode_header(length: u32) -> [u8; HEADER_LEN] {
    length.to_le_bytes()
}

/// Decode a transfer header back into an image length.
pub fn decode_header(header: [u8; HEADER_LEN]) -> u32 {
    u32::from_le_bytes(header)
}

/// Locate the trigger sequence inside one chunk read from the target.
///
/// Returns the offset of the first break of the first complete run. Only the
/// chunk itself is searched; a run split across two reads is not a trigger.
pub fn find_trigger(chunk: &[u8]) -> Option<usize> {
    chunk.windows(TRIGGER.len()).position(|w| w == TRIGGER)
}
