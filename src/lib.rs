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

//! Serial boot loader.
//!
//! The target side ([`receiver`], [`uart`], [`diag`]) is `no_std` and asks
//! for an image over its UART at boot. The host side ([`bridge`],
//! [`transmitter`], [`link`]) needs the `host` feature: it shares the serial
//! line between the operator's terminal and image uploads.

#![cfg_attr(not(any(test, feature = "host")), no_std)]

pub mod protocol;

// Target
pub mod diag;
pub mod receiver;
pub mod uart;

// Host
#[cfg(feature = "host")]
pub mod bridge;
#[cfg(feature = "host")]
pub mod error;
#[cfg(feature = "host")]
pub mod link;
#[cfg(feature = "host")]
pub mod pending;
#[cfg(feature = "host")]
pub mod terminal;
#[cfg(feature = "host")]
pub mod transmitter;

#[cfg(feature = "host")]
pub use error::{Error, Result};
