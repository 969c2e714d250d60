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

//! Host-side error types.

use std::io;
use std::path::PathBuf;
use nix::errno::Errno;

/// Alias for `Result<T, raspboot::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop the host tool.
///
/// Apart from the transient open failures that [`Error::is_transient`]
/// recognises, every variant is fatal.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The serial device could not be opened or configured.
    #[error("{device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },

    /// An I/O call failed; `op` names it.
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The image could not be opened or measured.
    #[error("{}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The image is larger than the protocol allows.
    #[error("kernel too big: {size} bytes, limit is {max}")]
    ImageTooBig { size: u64, max: u64 },

    /// The target did not answer the transfer header with "OK".
    #[error("error after sending size: target replied {reply:02X?}")]
    Rejected { reply: [u8; 2] },

    /// The link hit end-of-file in the middle of an exchange.
    #[error("{op}: link closed")]
    LinkClosed { op: &'static str },

    /// `poll` reported an error condition on one of the watched descriptors.
    #[error("error on {source_name}")]
    Poll { source_name: &'static str },
}

impl Error {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(io::Error) -> Error {
        move |source| Error::Io { op, source }
    }

    /// Whether this is an open failure that goes away once the device node
    /// shows up and udev has finished changing its ownership.
    ///
    /// serialport reports a busy or locked device as `NoDevice` and a missing
    /// one (`ENODEV`, `ENXIO`) as `Unknown` carrying the errno text, so the
    /// kind alone is not enough.
    pub fn is_transient(&self) -> bool {
        let Error::Open { source, .. } = self else {
            return false;
        };
        match source.kind() {
            serialport::ErrorKind::Io(io::ErrorKind::NotFound)
            | serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => true,
            serialport::ErrorKind::Unknown => [Errno::ENODEV, Errno::ENXIO]
                .iter()
                .any(|errno| source.description == errno.desc()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_error(kind: serialport::ErrorKind, description: &str) -> Error {
        Error::Open {
            device: "/dev/ttyUSB0".into(),
            source: serialport::Error::new(kind, description),
        }
    }

    #[test]
    fn test_missing_device_is_transient() {
        use serialport::ErrorKind::{Io, Unknown};

        assert!(open_error(Io(io::ErrorKind::NotFound), "No such file").is_transient());
        assert!(open_error(Io(io::ErrorKind::PermissionDenied), "denied").is_transient());
        assert!(open_error(Unknown, Errno::ENODEV.desc()).is_transient());
        assert!(open_error(Unknown, Errno::ENXIO.desc()).is_transient());
    }

    #[test]
    fn test_busy_device_is_fatal() {
        use serialport::ErrorKind::NoDevice;

        assert!(!open_error(NoDevice, Errno::EBUSY.desc()).is_transient());
        assert!(
            !open_error(NoDevice, "Unable to acquire exclusive lock on serial port")
                .is_transient()
        );
    }

    #[test]
    fn test_structural_errors_are_fatal() {
        assert!(!open_error(serialport::ErrorKind::InvalidInput, "bad baud").is_transient());
        assert!(!open_error(serialport::ErrorKind::Unknown, Errno::ENOTTY.desc()).is_transient());
        assert!(!Error::ImageTooBig { size: 3, max: 2 }.is_transient());
        assert!(!Error::Rejected { reply: *b"SE" }.is_transient());
    }

    #[test]
    fn test_messages_name_the_operation() {
        let err = Error::Io {
            op: "write()",
            source: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert!(err.to_string().starts_with("write(): "));
        assert_eq!(
            Error::ImageTooBig { size: 0x20_0001, max: 0x20_0000 }.to_string(),
            "kernel too big: 2097153 bytes, limit is 2097152"
        );
        assert_eq!(Error::Poll { source_name: "STDIN" }.to_string(), "error on STDIN");
    }
}
