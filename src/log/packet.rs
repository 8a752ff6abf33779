//! Scoped access to one frame of a shared reader.
//!
//! A [`Packet`] is handed out by
//! [`PacketStreamReader::next_frame`](super::PacketStreamReader::next_frame)
//! together with the reader's lock. While it is alive no other thread can
//! move the shared stream position; dropping it skips any payload bytes that
//! were not read, so the next frame always starts on a tag boundary.

use std::cell::RefCell;
use std::fmt;
use std::io;

use parking_lot::ReentrantMutexGuard;
use serde_json::Value;

use super::reader::ReaderState;
use super::source::SourceId;
use crate::{PacketStreamError, Result};

/// Parsed frame header, everything up to the first payload byte.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PacketHeader {
    pub src: SourceId,
    pub time: i64,
    pub size: usize,
    pub sequence_num: usize,
    pub meta: Option<Value>,
    pub frame_streampos: Option<u64>,
}

/// One frame of one source, holding the reader lock until dropped.
pub struct Packet<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<ReaderState>>,
    generation: u64,
    /// Source the frame belongs to.
    pub src: SourceId,
    /// Capture timestamp in microseconds.
    pub time: i64,
    /// Payload length in bytes.
    pub size: usize,
    /// Per-source sequence number.
    pub sequence_num: usize,
    /// Metadata written immediately before the frame, if any.
    pub meta: Option<Value>,
    /// Offset of the first byte of the frame; `None` on non-seekable streams.
    pub frame_streampos: Option<u64>,
}

impl<'a> Packet<'a> {
    pub(crate) fn new(
        guard: ReentrantMutexGuard<'a, RefCell<ReaderState>>,
        generation: u64,
        header: PacketHeader,
    ) -> Self {
        Self {
            guard,
            generation,
            src: header.src,
            time: header.time,
            size: header.size,
            sequence_num: header.sequence_num,
            meta: header.meta,
            frame_streampos: header.frame_streampos,
        }
    }

    /// False once a later `next_frame`/`seek` on this thread took over the stream.
    pub fn is_valid(&self) -> bool {
        self.guard.borrow().generation == self.generation
    }

    /// Payload bytes not read yet.
    pub fn remaining(&self) -> usize {
        let state = self.guard.borrow();
        if state.generation == self.generation { state.pending } else { 0 }
    }

    /// Read up to `buf.len()` payload bytes. Returns 0 once the payload is exhausted.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.guard.borrow_mut();
        if state.generation != self.generation {
            return Err(PacketStreamError::PacketInvalidated);
        }
        let want = buf.len().min(state.pending);
        let got = state.stream.read_bytes(&mut buf[..want]);
        state.pending -= got;
        if got < want {
            state.pending = 0;
            return Err(PacketStreamError::truncated(format!(
                "payload of packet {} from source {}",
                self.sequence_num, self.src
            )));
        }
        Ok(got)
    }

    /// Fill `buf` completely from the payload.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.is_valid() {
            return Err(PacketStreamError::PacketInvalidated);
        }
        let available = self.remaining();
        if buf.len() > available {
            return Err(PacketStreamError::PayloadExhausted { requested: buf.len(), available });
        }
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read_bytes(&mut buf[filled..])?;
        }
        Ok(())
    }

    /// Read the rest of the payload into a new buffer.
    pub fn read_payload(&mut self) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; self.remaining()];
        self.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Discard the rest of the payload.
    pub fn skip_payload(&mut self) -> Result<()> {
        let mut state = self.guard.borrow_mut();
        if state.generation != self.generation {
            return Err(PacketStreamError::PacketInvalidated);
        }
        state.drain_pending();
        Ok(())
    }
}

impl io::Read for Packet<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf).map_err(|e| match e {
            PacketStreamError::Truncated { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            other => io::Error::other(other),
        })
    }
}

impl Drop for Packet<'_> {
    fn drop(&mut self) {
        let mut state = self.guard.borrow_mut();
        if state.generation == self.generation {
            state.drain_pending();
        }
    }
}

impl fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("src", &self.src)
            .field("time", &self.time)
            .field("size", &self.size)
            .field("sequence_num", &self.sequence_num)
            .field("meta", &self.meta)
            .field("frame_streampos", &self.frame_streampos)
            .finish_non_exhaustive()
    }
}
