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

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use crate::error::{Error, Result};
use crate::link::Link;
use crate::protocol::*;

/// File read size while streaming
pub const CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// Upload Trait
// ============================================================================

/// What the console bridge runs once it sees the trigger.
///
/// Runs to completion on the bridge's thread; the bridge services nothing
/// else until it returns.
pub trait Upload {
    fn upload(&mut self, link: &mut dyn Link) -> Result<()>;
}

/// Uploads one image file from disk.
pub struct ImageUpload {
    path: PathBuf,
}

impl ImageUpload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ImageUpload { path: path.into() }
    }
}

impl Upload for ImageUpload {
    fn upload(&mut self, link: &mut dyn Link) -> Result<()> {
        send(link, &self.path).map(|_| ())
    }
}

// ============================================================================
// States
// ============================================================================

pub struct SendHeader;
pub struct AwaitReply;
pub struct StreamImage;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct TransmitterFsm<'a, State> {
    state: PhantomData<State>,
    link: &'a mut dyn Link,
    image: File,
    path: PathBuf,
    size: u32,
    sent: u64,
    buffer: Box<[u8]>,
}

pub enum Step<'a> {
    Continue(Box<dyn TransmitterState<'a> + 'a>),
    Finished(u64),
}

// ============================================================================
// Trait
// ============================================================================

pub trait TransmitterState<'a> {
    fn step(self: Box<Self>) -> Result<Step<'a>>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> TransmitterFsm<'a, S> {
    fn transition<T>(self) -> Box<TransmitterFsm<'a, T>> {
        Box::new(TransmitterFsm {
            state: PhantomData,
            link: self.link,
            image: self.image,
            path: self.path,
            size: self.size,
            sent: self.sent,
            buffer: self.buffer,
        })
    }

    fn io_error(op: &'static str) -> impl FnOnce(io::Error) -> Error {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        move |source| {
            log::debug!("{} failed in state {}: {}", op, state_name, source);
            match source.kind() {
                io::ErrorKind::UnexpectedEof => Error::LinkClosed { op },
                _ => Error::Io { op, source },
            }
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> TransmitterState<'a> for TransmitterFsm<'a, SendHeader> {
    fn step(self: Box<Self>) -> Result<Step<'a>> {
        let mut fsm = *self;
        let header = encode_header(fsm.size);
        fsm.link.write_all(&header).map_err(Self::io_error("write()"))?;
        log::debug!("Sent: header {:02X?}", header);
        Ok(Step::Continue(fsm.transition::<AwaitReply>()))
    }
}

impl<'a> TransmitterState<'a> for TransmitterFsm<'a, AwaitReply> {
    fn step(self: Box<Self>) -> Result<Step<'a>> {
        let mut fsm = *self;
        let mut reply = [0u8; REPLY_LEN];
        fsm.link.read_exact(&mut reply).map_err(Self::io_error("read()"))?;

        if reply != ACCEPT {
            log::debug!("Received: {:02X?}, expected 'OK'", reply);
            return Err(Error::Rejected { reply });
        }

        log::debug!("Received: 'OK'");
        Ok(Step::Continue(fsm.transition::<StreamImage>()))
    }
}

impl<'a> TransmitterState<'a> for TransmitterFsm<'a, StreamImage> {
    fn step(self: Box<Self>) -> Result<Step<'a>> {
        let mut fsm = *self;

        let len = match fsm.image.read(&mut fsm.buffer) {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(Step::Continue(Box::new(fsm)));
            }
            Err(source) => return Err(Error::Image { path: fsm.path, source }),
        };

        if len == 0 {
            fsm.link.set_blocking(false).map_err(Self::io_error("set_blocking()"))?;
            log::info!("Sent {} of {} bytes", fsm.sent, fsm.size);
            return Ok(Step::Finished(fsm.sent));
        }

        fsm.link.write_all(&fsm.buffer[..len]).map_err(Self::io_error("write()"))?;
        fsm.sent += len as u64;
        log::debug!("Sent: {} byte chunk ({}/{})", len, fsm.sent, fsm.size);
        Ok(Step::Continue(Box::new(fsm)))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> TransmitterFsm<'a, SendHeader> {
    /// Open and measure the image, then switch the link to blocking mode.
    ///
    /// Nothing is written to the link if the image cannot be used.
    pub fn new(link: &'a mut dyn Link, path: &Path) -> Result<Box<dyn TransmitterState<'a> + 'a>> {
        let image_error = |source: io::Error| Error::Image { path: path.to_path_buf(), source };

        let mut image = File::open(path).map_err(image_error)?;
        let size = image.seek(SeekFrom::End(0)).map_err(image_error)?;
        if size > MAX_IMAGE_SIZE {
            return Err(Error::ImageTooBig { size, max: MAX_IMAGE_SIZE });
        }
        image.seek(SeekFrom::Start(0)).map_err(image_error)?;

        link.set_blocking(true)
            .map_err(|source| Error::Io { op: "set_blocking()", source })?;

        eprintln!("### sending kernel {} [{} byte]", path.display(), size);

        Ok(Box::new(TransmitterFsm {
            state: PhantomData::<SendHeader>,
            link,
            image,
            path: path.to_path_buf(),
            // MAX_IMAGE_SIZE fits in the header
            size: size as u32,
            sent: 0,
            buffer: vec![0; CHUNK_SIZE].into_boxed_slice(),
        }))
    }
}

/// Send one image over the link and return the number of bytes streamed.
pub fn send(link: &mut dyn Link, path: &Path) -> Result<u64> {
    let mut state = TransmitterFsm::new(link, path)?;

    loop {
        match state.step()? {
            Step::Continue(next) => state = next,
            Step::Finished(sent) => {
                eprintln!("### finished sending");
                return Ok(sent);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
    use tempfile::NamedTempFile;
    use crate::link::MockLink;

    fn image_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_send_ten_byte_image() {
        let content: Vec<u8> = (0..10).collect();
        let file = image_file(&content);

        let mut expected_writes = vec![0x0A, 0x00, 0x00, 0x00];
        expected_writes.extend_from_slice(&content);

        let mut link = MockLink::new(vec![Some(ACCEPT.to_vec())], expected_writes);
        let sent = send(&mut link, file.path()).expect("transfer");

        assert_eq!(sent, 10);
        assert_eq!(link.mode_changes, vec![true, false]);
        assert!(!link.blocking);
    }

    #[test]
    fn test_send_empty_image() {
        let file = image_file(b"");
        let mut link = MockLink::new(vec![Some(ACCEPT.to_vec())], vec![0, 0, 0, 0]);
        assert_eq!(send(&mut link, file.path()).expect("transfer"), 0);
    }

    #[test]
    fn test_send_multiple_chunks_with_partial_writes() {
        let content: Vec<u8> = (0..CHUNK_SIZE + 1000).map(|i| (i % 251) as u8).collect();
        let file = image_file(&content);

        let mut expected_writes = encode_header(content.len() as u32).to_vec();
        expected_writes.extend_from_slice(&content);

        // Reply arrives one byte at a time, writes are accepted 1000 at a time
        let reply = vec![Some(b"O".to_vec()), Some(b"K".to_vec())];
        let mut link = MockLink::new(reply, expected_writes).with_write_limit(1000);
        assert_eq!(send(&mut link, file.path()).expect("transfer"), content.len() as u64);
    }

    #[test]
    fn test_oversized_image_sends_nothing() {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(MAX_IMAGE_SIZE + 1).unwrap();

        let mut link = MockLink::new(Vec::new(), Vec::new());
        match send(&mut link, file.path()) {
            Err(Error::ImageTooBig { size, max }) => {
                assert_eq!(size, MAX_IMAGE_SIZE + 1);
                assert_eq!(max, MAX_IMAGE_SIZE);
            }
            other => panic!("expected ImageTooBig, got {:?}", other.map(|_| ())),
        }
        assert!(link.mode_changes.is_empty());
    }

    #[test]
    fn test_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.img");

        let mut link = MockLink::new(Vec::new(), Vec::new());
        match send(&mut link, &path) {
            Err(Error::Image { source, .. }) => assert_eq!(source.kind(), io::ErrorKind::NotFound),
            other => panic!("expected Image error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_rejected_by_target() {
        let file = image_file(b"kernel");
        let mut link = MockLink::new(vec![Some(REJECT.to_vec())], encode_header(6).to_vec());

        match send(&mut link, file.path()) {
            Err(Error::Rejected { reply }) => assert_eq!(reply, REJECT),
            other => panic!("expected Rejected, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_link_closed_before_reply() {
        let file = image_file(b"kernel");
        let reply = vec![Some(b"O".to_vec()), Some(Vec::new())];
        let mut link = MockLink::new(reply, encode_header(6).to_vec());

        let err = send(&mut link, file.path()).unwrap_err();
        assert!(matches!(err, Error::LinkClosed { op: "read()" }));
    }

    #[test]
    fn test_image_upload_trait() {
        let file = image_file(b"abc");
        let mut expected_writes = encode_header(3).to_vec();
        expected_writes.extend_from_slice(b"abc");

        let mut link = MockLink::new(vec![Some(ACCEPT.to_vec())], expected_writes);
        let mut upload = ImageUpload::new(file.path());
        upload.upload(&mut link).expect("upload");
    }

    // ------------------------------------------------------------------------
    // Host and target talking over an in-process line
    // ------------------------------------------------------------------------

    struct ChannelLink {
        rx: Receiver<u8>,
        tx: Sender<u8>,
    }

    impl Link for ChannelLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Ok(first) = self.rx.recv() else {
                return Ok(0);
            };
            buf[0] = first;
            let mut n = 1;
            while n < buf.len() {
                match self.rx.try_recv() {
                    Ok(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for &byte in buf {
                self.tx.send(byte).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            }
            Ok(buf.len())
        }

        fn set_blocking(&mut self, _blocking: bool) -> io::Result<()> {
            Ok(())
        }
    }

    struct ChannelUart {
        rx: Receiver<u8>,
        tx: Sender<u8>,
    }

    impl crate::uart::Uart for ChannelUart {
        fn init(&mut self) {}

        fn getc(&mut self) -> u8 {
            self.rx.recv().expect("host hung up")
        }

        fn putc(&mut self, byte: u8) {
            self.tx.send(byte).expect("host hung up");
        }

        fn deinit(&mut self) {}
    }

    #[test]
    fn test_end_to_end_with_receiver() {
        use crate::receiver::{boot, BootArgs, Board, LoadRegion};

        let content: Vec<u8> = (0..10).collect();
        let file = image_file(&content);

        let (host_tx, target_rx) = mpsc::channel();
        let (target_tx, host_rx) = mpsc::channel();

        let target = std::thread::spawn(move || {
            let board = Board {
                model: "loopback",
                peripheral_base: 0,
                load_base: 0x8000,
                load_ceiling: 0x8000 + 0x1000,
            };
            let mut memory = vec![0u8; board.load_capacity()];
            let uart = ChannelUart { rx: target_rx, tx: target_tx };
            let region = LoadRegion::new(board.load_base, &mut memory);
            let handoff = boot(uart, &board, region, BootArgs::default());
            (handoff, memory)
        });

        let mut link = ChannelLink { rx: host_rx, tx: host_tx };

        // Boot log first, then the trigger
        let mut log = Vec::new();
        let mut buf = [0u8; 64];
        while find_trigger(&log).is_none() {
            let n = link.read(&mut buf).unwrap();
            assert!(n > 0, "target closed before trigger");
            log.extend_from_slice(&buf[..n]);
        }
        assert!(log.starts_with(b"\n\nRaspbootin V"));

        assert_eq!(send(&mut link, file.path()).expect("transfer"), 10);

        let (handoff, memory) = target.join().unwrap();
        assert_eq!(handoff.entry, 0x8000);
        assert_eq!(handoff.length, 10);
        assert_eq!(&memory[..10], &content[..]);

        let mut tail = Vec::new();
        while let Ok(byte) = link.rx.try_recv() {
            tail.push(byte);
        }
        assert_eq!(tail, b"booting your kernel...\n\n");
    }
}
