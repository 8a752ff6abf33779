//! Low-level byte cursor over a `.pango` recording.
//!
//! [`PacketStream`] understands the framing primitives (tags, varints,
//! timestamps and inline JSON blocks) but nothing about sources or packets.
//! It is not thread-safe; [`PacketStreamReader`](super::PacketStreamReader)
//! serialises access to it.
//!
//! ## Tag cache
//!
//! [`peek_tag`](PacketStream::peek_tag) consumes three bytes from the
//! underlying stream but keeps them logically unread: a following
//! [`read_tag`](PacketStream::read_tag) returns the cached value, and
//! [`tell`](PacketStream::tell) reports the offset of the tag's first byte.
//! Reading anything else discards the cache.
//!
//! ## Fail state
//!
//! Primitives do not return errors for ordinary end-of-stream. A short read
//! clears [`good`](PacketStream::good) and yields `None` (or
//! [`Tag::END`] for tags); callers decide whether that is a clean end at a
//! frame boundary or a truncated record.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::tags::{TAG_LENGTH, Tag};
use super::varint;
use crate::{PacketStreamError, Result};

/// Blanket trait for random-access byte sources.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

enum Inner {
    Seekable(BufReader<Box<dyn ReadSeek>>),
    Sequential(BufReader<Box<dyn Read + Send>>),
}

impl Inner {
    fn reader(&mut self) -> &mut dyn Read {
        match self {
            Inner::Seekable(r) => r,
            Inner::Sequential(r) => r,
        }
    }
}

/// Stateful cursor with tag peeking and forward-only fallbacks for pipes.
pub struct PacketStream {
    inner: Option<Inner>,
    pos: u64,
    tag: Option<Tag>,
    good: bool,
}

impl Default for PacketStream {
    fn default() -> Self {
        Self { inner: None, pos: 0, tag: None, good: false }
    }
}

impl std::fmt::Debug for PacketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("open", &self.is_open())
            .field("seekable", &self.seekable())
            .field("pos", &self.pos)
            .field("tag", &self.tag)
            .field("good", &self.good)
            .finish()
    }
}

/// Whether `path` names a FIFO, which pins a stream in sequential mode.
#[cfg(unix)]
pub fn is_pipe<P: AsRef<Path>>(path: P) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path).map(|m| m.file_type().is_fifo()).unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_pipe<P: AsRef<Path>>(_path: P) -> bool {
    false
}

impl PacketStream {
    /// Open a file; FIFOs are opened in sequential (non-seekable) mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let pipe = is_pipe(path);
        let file = File::open(path).map_err(|e| PacketStreamError::file_error(path, e))?;
        debug!("Opened packet stream {} (pipe: {})", path.display(), pipe);
        Ok(if pipe { Self::from_sequential(file) } else { Self::from_seekable(file) })
    }

    /// Wrap a random-access source.
    pub fn from_seekable<R: Read + Seek + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Some(Inner::Seekable(BufReader::new(Box::new(reader)))),
            pos: 0,
            tag: None,
            good: true,
        }
    }

    /// Wrap a forward-only source such as a pipe or socket.
    pub fn from_sequential<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Some(Inner::Sequential(BufReader::new(Box::new(reader)))),
            pos: 0,
            tag: None,
            good: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Whether the stream supports `seek`/`tell`.
    pub fn seekable(&self) -> bool {
        matches!(self.inner, Some(Inner::Seekable(_)))
    }

    /// False once a read came up short or an I/O error occurred.
    pub fn good(&self) -> bool {
        self.good && self.inner.is_some()
    }

    /// Reset the fail state.
    pub fn clear(&mut self) {
        self.good = self.inner.is_some();
    }

    pub fn close(&mut self) {
        self.inner = None;
        self.tag = None;
        self.good = false;
        self.pos = 0;
    }

    /// Peek the next tag without logically consuming it.
    ///
    /// Returns [`Tag::END`] when fewer than three bytes are left.
    pub fn peek_tag(&mut self) -> Tag {
        if let Some(tag) = self.tag {
            return tag;
        }
        let mut bytes = [0u8; TAG_LENGTH];
        if self.read_raw(&mut bytes) == TAG_LENGTH {
            let tag = Tag::from_bytes(bytes);
            self.tag = Some(tag);
            tag
        } else {
            Tag::END
        }
    }

    /// Consume the next tag.
    pub fn read_tag(&mut self) -> Tag {
        let tag = self.peek_tag();
        self.tag = None;
        tag
    }

    /// Consume the next tag, failing if it is not `expected`.
    pub fn read_tag_expect(&mut self, expected: Tag) -> Result<Tag> {
        let offset = self.tell();
        let found = self.read_tag();
        if found != expected {
            return Err(PacketStreamError::tag_mismatch(expected, found, offset));
        }
        Ok(found)
    }

    /// Read one byte.
    pub fn get(&mut self) -> Option<u8> {
        self.tag = None;
        let mut byte = [0u8; 1];
        (self.read_raw(&mut byte) == 1).then_some(byte[0])
    }

    /// Read up to `buf.len()` bytes, returning how many were obtained.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        self.tag = None;
        self.read_raw(buf)
    }

    /// Read exactly `buf.len()` bytes or report truncation of `context`.
    pub fn read_exact_or(&mut self, buf: &mut [u8], context: &str) -> Result<()> {
        if self.read_bytes(buf) == buf.len() {
            Ok(())
        } else {
            Err(PacketStreamError::truncated(context))
        }
    }

    /// Skip `len` bytes: a relative seek when seekable, read-and-discard otherwise.
    ///
    /// Returns the number of bytes actually skipped over.
    pub fn skip(&mut self, len: u64) -> u64 {
        self.tag = None;
        let Some(inner) = self.inner.as_mut() else {
            self.good = false;
            return 0;
        };
        match inner {
            Inner::Seekable(r) => match i64::try_from(len).map(|off| r.seek_relative(off)) {
                Ok(Ok(())) => {
                    self.pos += len;
                    len
                }
                _ => {
                    self.good = false;
                    0
                }
            },
            Inner::Sequential(r) => match io::copy(&mut r.by_ref().take(len), &mut io::sink()) {
                Ok(n) => {
                    self.pos += n;
                    if n < len {
                        self.good = false;
                    }
                    n
                }
                Err(_) => {
                    self.good = false;
                    0
                }
            },
        }
    }

    /// Read a variable-length unsigned integer; `None` on failure.
    pub fn read_uint(&mut self) -> Option<u64> {
        self.tag = None;
        match varint::read_uint(self) {
            Ok(value) => Some(value),
            Err(e) => {
                trace!("varint decode failed at {}: {}", self.pos, e);
                self.good = false;
                None
            }
        }
    }

    /// Read an 8 byte little-endian timestamp; `None` on failure.
    pub fn read_timestamp(&mut self) -> Option<i64> {
        let mut bytes = [0u8; 8];
        (self.read_bytes(&mut bytes) == 8).then(|| i64::from_le_bytes(bytes))
    }

    /// Read an 8 byte little-endian unsigned integer; `None` on failure.
    pub fn read_u64(&mut self) -> Option<u64> {
        let mut bytes = [0u8; 8];
        (self.read_bytes(&mut bytes) == 8).then(|| u64::from_le_bytes(bytes))
    }

    /// Parse one inline JSON value, consuming exactly its bytes.
    pub fn read_json(&mut self, context: &str) -> Result<Value> {
        self.tag = None;
        let mut de = serde_json::Deserializer::from_reader(&mut *self);
        Value::deserialize(&mut de).map_err(|e| {
            if e.is_eof() {
                PacketStreamError::truncated(context)
            } else {
                PacketStreamError::json(context, e)
            }
        })
    }

    /// Logical offset of the next unread byte; `None` on non-seekable streams.
    pub fn tell(&self) -> Option<u64> {
        if !self.seekable() {
            return None;
        }
        match self.tag {
            Some(_) => Some(self.pos - TAG_LENGTH as u64),
            None => Some(self.pos),
        }
    }

    /// Jump to an absolute offset. No-op on non-seekable streams.
    pub fn seek(&mut self, pos: u64) {
        self.seek_to(SeekFrom::Start(pos));
    }

    /// Jump relative to the end of the stream. No-op on non-seekable streams.
    pub fn seek_from_end(&mut self, offset: i64) {
        self.seek_to(SeekFrom::End(offset));
    }

    fn seek_to(&mut self, target: SeekFrom) {
        if let Some(Inner::Seekable(r)) = self.inner.as_mut() {
            self.tag = None;
            match r.seek(target) {
                Ok(pos) => self.pos = pos,
                Err(e) => {
                    trace!("seek to {:?} failed: {}", target, e);
                    self.good = false;
                }
            }
        }
    }

    /// Scan forward one byte at a time until the next three bytes form a valid tag.
    ///
    /// The tag found is left cached, so [`tell`](Self::tell) reports its
    /// first byte. Returns [`Tag::END`] if the stream runs out first. This is
    /// a heuristic: payload bytes that happen to spell a tag are indistinguishable.
    pub fn sync_to_tag(&mut self) -> Tag {
        let start = self.pos;
        let mut window = match self.tag.take() {
            Some(tag) => tag.to_bytes(),
            None => {
                let mut bytes = [0u8; TAG_LENGTH];
                if self.read_raw(&mut bytes) != TAG_LENGTH {
                    return Tag::END;
                }
                bytes
            }
        };

        loop {
            let candidate = Tag::from_bytes(window);
            if candidate.is_valid() {
                debug!("Resynced to tag '{}' after {} bytes", candidate, self.pos - start);
                self.tag = Some(candidate);
                return candidate;
            }
            let mut byte = [0u8; 1];
            if self.read_raw(&mut byte) != 1 {
                return Tag::END;
            }
            window = [window[1], window[2], byte[0]];
        }
    }

    /// Fill `buf` as far as possible from the underlying stream.
    fn read_raw(&mut self, buf: &mut [u8]) -> usize {
        let Some(inner) = self.inner.as_mut() else {
            self.good = false;
            return 0;
        };
        let reader = inner.reader();
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        self.pos += filled as u64;
        if filled < buf.len() {
            self.good = false;
        }
        filled
    }
}

impl Read for PacketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.tag = None;
        let Some(inner) = self.inner.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "packet stream is closed"));
        };
        match inner.reader().read(buf) {
            Ok(n) => {
                self.pos += n as u64;
                if n == 0 && !buf.is_empty() {
                    self.good = false;
                }
                Ok(n)
            }
            Err(e) => {
                self.good = false;
                Err(e)
            }
        }
    }
}
