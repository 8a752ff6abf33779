//! Frame-oriented reader for `.pango` recordings.
//!
//! A [`PacketStreamReader`] owns one [`PacketStream`] behind a re-entrant
//! lock. Any number of consumers, on any number of threads, may pull frames
//! from the same reader; the lock guarantees that the bytes of one frame are
//! never split between two [`Packet`]s.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use pango_log::PacketStreamReader;
//!
//! fn dump() -> pango_log::Result<()> {
//!     let reader = PacketStreamReader::open("capture.pango")?;
//!     for source in reader.sources() {
//!         println!("{}: {} ({:?} frames)", source.id, source.driver, reader.total_frames(source.id));
//!     }
//!
//!     reader.seek(0, 3)?;
//!     while let Some(mut packet) = reader.next_frame()? {
//!         let payload = packet.read_payload()?;
//!         println!("src {} #{} @ {}us: {} bytes", packet.src, packet.sequence_num, packet.time, payload.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Index policy
//!
//! - Seekable files with a footer load the stored index at open time.
//! - Seekable files without one (an interrupted recording, say) are indexed
//!   with a single forward scan; [`fix_file_index`](PacketStreamReader::fix_file_index)
//!   persists the result.
//! - Pipes are read strictly forward and are never indexed.
//!
//! Seeking to a frame past the known index scans forward from the last
//! indexed frame, indexing as it goes, and fails with
//! [`FrameNotIndexed`](crate::PacketStreamError::FrameNotIndexed) if the
//! stream ends first.

use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use parking_lot::ReentrantMutex;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::index::packet_infos_from_json;
use super::packet::{Packet, PacketHeader};
use super::packet_stream::PacketStream;
use super::source::{PacketInfo, PacketStreamSource, SourceId, SourceRecord, SourceTable};
use super::tags::{PANGO_MAGIC, TAG_LENGTH, Tag};
use super::writer::write_index_footer;
use crate::{PacketStreamError, Result};

/// Size of the footer: `FTR` plus the little-endian offset of the statistics block.
const FOOTER_LEN: i64 = (TAG_LENGTH + std::mem::size_of::<u64>()) as i64;

/// Everything guarded by the reader lock.
pub(crate) struct ReaderState {
    pub(crate) stream: PacketStream,
    pub(crate) sources: SourceTable,
    /// Unread payload bytes of the most recently handed out packet.
    pub(crate) pending: usize,
    /// Bumped whenever a packet is superseded; stale packets compare unequal.
    pub(crate) generation: u64,
    header: Value,
    start_time_us: i64,
    /// Offset just past the header and the leading source descriptors.
    data_start: Option<u64>,
    /// Set once a scan has reached the end; seeks past the index then fail fast.
    index_complete: bool,
}

impl ReaderState {
    fn new(stream: PacketStream) -> Self {
        Self {
            stream,
            sources: SourceTable::new(),
            pending: 0,
            generation: 0,
            header: Value::Null,
            start_time_us: 0,
            data_start: None,
            index_complete: false,
        }
    }

    /// Skip whatever is left of the current packet's payload.
    pub(crate) fn drain_pending(&mut self) {
        if self.pending > 0 {
            let pending = self.pending as u64;
            if self.stream.skip(pending) < pending {
                trace!("Stream ended while draining {} payload bytes", pending);
            }
            self.pending = 0;
        }
    }

    /// Drain and invalidate any packet handed out earlier on this thread.
    fn release_outstanding(&mut self) {
        self.drain_pending();
        self.generation += 1;
    }

    fn check_magic(&mut self) -> Result<()> {
        let mut magic = [0u8; PANGO_MAGIC.len()];
        let got = self.stream.read_bytes(&mut magic);
        if got != magic.len() || &magic != PANGO_MAGIC {
            return Err(PacketStreamError::BadMagic {
                details: format!("expected {:?}, found {:?}", PANGO_MAGIC, &magic[..got]),
            });
        }
        Ok(())
    }

    fn parse_header(&mut self) -> Result<()> {
        self.stream.read_tag_expect(Tag::PANGO_HDR)?;
        let header = self.stream.read_json("file header")?;
        self.start_time_us = header
            .get("time_us")
            .and_then(Value::as_i64)
            .ok_or_else(|| PacketStreamError::parse("file header", "missing integer 'time_us'"))?;
        self.header = header;
        // newline
        self.stream.get();
        Ok(())
    }

    fn parse_new_source(&mut self) -> Result<SourceId> {
        self.stream.read_tag_expect(Tag::ADD_SOURCE)?;
        let json = self.stream.read_json("source descriptor")?;
        self.stream.get();
        let record: SourceRecord = serde_json::from_value(json)
            .map_err(|e| PacketStreamError::json("source descriptor", e))?;
        let id = self.sources.insert_record(record)?;
        debug!("Found source {} ({})", id, self.sources.get(id).map_or("", |s| s.driver.as_str()));
        Ok(id)
    }

    /// Parse a statistics block. Returns whether it carried a usable index.
    fn parse_index(&mut self) -> Result<bool> {
        self.stream.read_tag_expect(Tag::PANGO_STATS)?;
        let json = self.stream.read_json("statistics block")?;
        let (Some(positions), Some(times)) = (json.get("src_packet_index"), json.get("src_packet_times"))
        else {
            return Ok(false);
        };

        let infos = packet_infos_from_json(positions, times)?;
        if infos.len() < self.sources.len() {
            return Err(PacketStreamError::parse(
                "statistics block",
                format!("index covers {} sources but {} are declared", infos.len(), self.sources.len()),
            ));
        }

        self.sources.ensure_len(infos.len());
        for (source, index) in self.sources.iter_mut().zip(infos) {
            source.index = index;
        }
        Ok(true)
    }

    /// Load the stored index through the footer. Position is restored afterwards.
    fn setup_index(&mut self) -> bool {
        if !self.stream.seekable() {
            return false;
        }
        let resume = self.stream.tell();

        let mut index_good = false;
        self.stream.seek_from_end(-FOOTER_LEN);
        if self.stream.peek_tag() == Tag::PANGO_FOOTER {
            self.stream.read_tag();
            if let Some(stats_pos) = self.stream.read_u64() {
                self.stream.seek(stats_pos);
                if self.stream.peek_tag() == Tag::PANGO_STATS {
                    index_good = match self.parse_index() {
                        Ok(good) => good,
                        Err(e) => {
                            warn!("Ignoring unreadable stored index: {}", e);
                            false
                        }
                    };
                }
            }
        }

        self.stream.clear();
        if let Some(pos) = resume {
            self.stream.seek(pos);
        }
        index_good
    }

    fn skip_magic(&mut self) -> Result<()> {
        self.stream.read_tag_expect(Tag::PANGO_MAGIC)?;
        let mut rest = [0u8; 2];
        if self.stream.read_bytes(&mut rest) != rest.len() || &rest != b"GO" {
            return Err(PacketStreamError::BadMagic {
                details: format!("embedded stream header followed by {:?}", rest),
            });
        }
        Ok(())
    }

    /// Parse the frame header at the current position (`JSN` or `PKT` tag).
    fn parse_packet_header(&mut self) -> Result<PacketHeader> {
        let frame_streampos = self.stream.tell();

        let mut meta = None;
        let mut meta_src = None;
        if self.stream.peek_tag() == Tag::SRC_JSON {
            self.stream.read_tag();
            let src = self
                .stream
                .read_uint()
                .ok_or_else(|| PacketStreamError::truncated("packet metadata source id"))?;
            meta = Some(self.stream.read_json("packet metadata")?);
            meta_src = Some(src as SourceId);
        }

        self.stream.read_tag_expect(Tag::SRC_PACKET)?;
        let time = self
            .stream
            .read_timestamp()
            .ok_or_else(|| PacketStreamError::truncated("packet timestamp"))?;
        let src = self
            .stream
            .read_uint()
            .ok_or_else(|| PacketStreamError::truncated("packet source id"))? as SourceId;

        if let Some(meta_src) = meta_src
            && meta_src != src
        {
            return Err(PacketStreamError::parse(
                "packet header",
                format!("frame of source {} preceded by metadata for source {}", src, meta_src),
            ));
        }

        let source = self.sources.require_mut(src)?;
        let size = if source.is_fixed_size() {
            source.data_size_bytes
        } else {
            self.stream
                .read_uint()
                .ok_or_else(|| PacketStreamError::truncated("packet length"))? as usize
        };

        let sequence_num = source.next_packet_id;
        source.next_packet_id += 1;
        if let Some(pos) = frame_streampos
            && source.index.len() == sequence_num
        {
            source.index.push(PacketInfo { pos, capture_time: time });
        }

        Ok(PacketHeader { src, time, size, sequence_num, meta, frame_streampos })
    }

    /// Advance to the next frame header, handling structural tags on the way.
    fn next_header(&mut self) -> Result<Option<PacketHeader>> {
        loop {
            match self.stream.peek_tag() {
                Tag::PANGO_SYNC => {
                    self.stream.read_tag();
                }
                Tag::PANGO_MAGIC => self.skip_magic()?,
                Tag::ADD_SOURCE => {
                    self.parse_new_source()?;
                }
                Tag::PANGO_STATS => {
                    self.parse_index()?;
                }
                Tag::PANGO_HDR => self.parse_header()?,
                Tag::SRC_JSON | Tag::SRC_PACKET => return self.parse_packet_header().map(Some),
                Tag::PANGO_FOOTER | Tag::END => return Ok(None),
                unknown => {
                    warn!("Unexpected packet type '{}' at {:?}, resyncing", unknown, self.stream.tell());
                    self.stream.sync_to_tag();
                }
            }
        }
    }

    /// Jump to a frame offset and realign every source's sequence counter with it.
    fn seek_to_offset(&mut self, pos: u64) {
        self.stream.clear();
        self.stream.seek(pos);
        for source in self.sources.iter_mut() {
            source.next_packet_id = source.index.partition_point(|info| info.pos < pos);
        }
    }

    /// Read frames without handing them out until the stream ends or `until` holds.
    fn scan_forward(&mut self, until: impl Fn(&SourceTable) -> bool) -> Result<()> {
        while !until(&self.sources) {
            match self.next_header()? {
                Some(header) => {
                    let size = header.size as u64;
                    if self.stream.skip(size) < size {
                        break;
                    }
                }
                None => break,
            }
        }
        self.stream.clear();
        Ok(())
    }

    fn index_len(&self, src: SourceId) -> usize {
        self.sources.get(src).map_or(0, |s| s.index.len())
    }

    /// Forward scan from the last indexed frame until `frame` of `src` is indexed.
    ///
    /// When the frame is never found the stream is put back where it was.
    fn extend_index(&mut self, src: SourceId, frame: usize) -> Result<()> {
        if self.index_complete {
            return Ok(());
        }
        let resume = self
            .sources
            .iter()
            .filter_map(|s| s.index.last().map(|info| info.pos))
            .max()
            .or(self.data_start);
        let Some(resume) = resume else {
            return Ok(());
        };

        debug!("Frame {} of source {} not indexed; scanning forward from {}", frame, src, resume);
        let saved = self.stream.tell();
        self.seek_to_offset(resume);
        let result = self.scan_forward(|sources| sources.get(src).is_some_and(|s| s.index.len() > frame));

        if result.is_err() || self.index_len(src) <= frame {
            if result.is_ok() {
                self.index_complete = true;
            }
            if let Some(saved) = saved {
                self.seek_to_offset(saved);
            }
        }
        result
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let Some(data_start) = self.data_start else {
            return Err(PacketStreamError::not_seekable("rebuild_index"));
        };
        let resume = self.stream.tell().unwrap_or(data_start);

        for source in self.sources.iter_mut() {
            source.index.clear();
            source.next_packet_id = 0;
        }

        self.seek_to_offset(data_start);
        let result = self.scan_forward(|_| false);
        self.seek_to_offset(resume);
        result?;
        self.index_complete = true;

        info!(
            "Rebuilt packet index: {} frames across {} sources",
            self.sources.iter().map(|s| s.index.len()).sum::<usize>(),
            self.sources.len()
        );
        Ok(())
    }
}

/// Thread-safe reader over one `.pango` stream.
pub struct PacketStreamReader {
    state: ReentrantMutex<RefCell<ReaderState>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for PacketStreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStreamReader").field("path", &self.path).finish_non_exhaustive()
    }
}

impl PacketStreamReader {
    /// Open a recording, parse its header and sources, and load or build its index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let stream = PacketStream::open(path)?;
        let reader = Self::from_stream(stream, Some(path.to_path_buf()))?;
        info!("Opened packet stream {} ({} sources)", path.display(), reader.sources().len());
        Ok(reader)
    }

    /// Read a recording from any random-access source, e.g. an in-memory cursor.
    pub fn from_reader<R: Read + Seek + Send + 'static>(reader: R) -> Result<Self> {
        Self::from_stream(PacketStream::from_seekable(reader), None)
    }

    /// Read a recording from a forward-only source. Seeking is unavailable.
    pub fn from_sequential<R: Read + Send + 'static>(reader: R) -> Result<Self> {
        Self::from_stream(PacketStream::from_sequential(reader), None)
    }

    fn from_stream(stream: PacketStream, path: Option<PathBuf>) -> Result<Self> {
        let mut state = ReaderState::new(stream);
        state.check_magic()?;
        state.parse_header()?;
        while state.stream.peek_tag() == Tag::ADD_SOURCE {
            state.parse_new_source()?;
        }
        state.data_start = state.stream.tell();

        if state.stream.seekable() && !state.setup_index() {
            warn!(
                "Index for '{}' missing or outdated, rebuilding",
                path.as_deref().map_or_else(|| "<stream>".into(), |p| p.display().to_string())
            );
            state.rebuild_index()?;
        }

        Ok(Self { state: ReentrantMutex::new(RefCell::new(state)), path })
    }

    /// Next frame of any source, or `None` at the end of the stream.
    ///
    /// Blocks while another thread holds a [`Packet`] of this reader. A
    /// packet previously obtained on the calling thread is drained and
    /// invalidated.
    pub fn next_frame(&self) -> Result<Option<Packet<'_>>> {
        let guard = self.state.lock();
        let (generation, header) = {
            let mut state = guard.borrow_mut();
            state.release_outstanding();
            match state.next_header()? {
                Some(header) => {
                    state.pending = header.size;
                    (state.generation, header)
                }
                None => return Ok(None),
            }
        };
        Ok(Some(Packet::new(guard, generation, header)))
    }

    /// Next frame of `src`, skipping frames of every other source.
    pub fn next_frame_from(&self, src: SourceId) -> Result<Option<Packet<'_>>> {
        loop {
            match self.next_frame()? {
                Some(packet) if packet.src == src => return Ok(Some(packet)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Position the stream so that the next frame of `src` is `frame`.
    ///
    /// Every other source's sequence counter is realigned with the new
    /// offset. Returns the frame now current for `src`.
    pub fn seek(&self, src: SourceId, frame: usize) -> Result<usize> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.release_outstanding();

        if !state.stream.seekable() {
            return Err(PacketStreamError::not_seekable("seek"));
        }
        state.sources.require(src)?;
        if state.index_len(src) <= frame {
            state.extend_index(src, frame)?;
        }

        let pos = state.sources.require(src)?.find_seek_location(frame).ok_or_else(|| {
            PacketStreamError::FrameNotIndexed { source_id: src, frame, indexed: state.index_len(src) }
        })?;
        state.seek_to_offset(pos);
        trace!("Seeked source {} to frame {} at {}", src, frame, pos);
        Ok(frame)
    }

    /// Seek `src` to its first frame captured at or after `time_us`.
    ///
    /// When every indexed frame is earlier the position is left unchanged.
    pub fn seek_to_time(&self, src: SourceId, time_us: i64) -> Result<usize> {
        let guard = self.state.lock();
        let target = {
            let state = guard.borrow();
            if !state.stream.seekable() {
                return Err(PacketStreamError::not_seekable("seek_to_time"));
            }
            let source = state.sources.require(src)?;
            match source.find_first_at_or_after(time_us) {
                Some(frame) => frame,
                None => return Ok(source.next_packet_id),
            }
        };
        self.seek(src, target)
    }

    /// Re-index the whole stream with one forward scan. The position is kept.
    pub fn rebuild_index(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.release_outstanding();
        if !state.stream.seekable() {
            return Err(PacketStreamError::not_seekable("rebuild_index"));
        }
        state.rebuild_index()
    }

    /// Rebuild the index and append it to the file so later opens can seek directly.
    pub fn fix_file_index(&self) -> Result<()> {
        let path = self.path.as_ref().ok_or_else(|| PacketStreamError::not_seekable("fix_file_index"))?;

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.release_outstanding();
        if !state.stream.seekable() {
            return Err(PacketStreamError::not_seekable("fix_file_index"));
        }
        state.rebuild_index()?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| PacketStreamError::file_error(path, e))?;
        let stats_pos = file.metadata().map_err(|e| PacketStreamError::file_error(path, e))?.len();
        write_index_footer(&mut file, stats_pos, state.sources.as_slice())
            .and_then(|()| file.flush())
            .map_err(|e| PacketStreamError::file_error(path, e))?;

        info!("Appended packet index to {}", path.display());
        Ok(())
    }

    /// Sequence number the next frame of `src` will carry.
    pub fn current_frame_id(&self, src: SourceId) -> Option<usize> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.sources.get(src).map(|s| s.next_packet_id)
    }

    /// Number of indexed frames of `src`; `None` for unknown sources.
    pub fn total_frames(&self, src: SourceId) -> Option<usize> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.sources.get(src).map(|s| s.index.len())
    }

    /// Snapshot of every known source.
    pub fn sources(&self) -> Vec<PacketStreamSource> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.sources.as_slice().to_vec()
    }

    pub fn source(&self, src: SourceId) -> Option<PacketStreamSource> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.sources.get(src).cloned()
    }

    /// The JSON object written after the `LIN` tag.
    pub fn header(&self) -> Value {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.header.clone()
    }

    /// Recording start, in microseconds since the Unix epoch.
    pub fn start_time_us(&self) -> i64 {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.start_time_us
    }

    pub fn is_seekable(&self) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.stream.seekable()
    }

    pub fn good(&self) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.stream.good()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Release the underlying stream. Outstanding packets become invalid.
    pub fn close(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.generation += 1;
        state.pending = 0;
        state.stream.close();
        state.sources.clear();
        debug!("Closed packet stream {:?}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{PacketStreamSource, PacketStreamWriter};
    use anyhow::{Context, Result, ensure};
    use serde_json::json;
    use std::io::Cursor;

    fn recording(indexable: bool) -> Result<Vec<u8>> {
        let mut writer = PacketStreamWriter::from_writer(Vec::new(), indexable)?;
        let cam = writer.add_source(PacketStreamSource::new("cam", "cam://0").with_fixed_size(4))?;
        let imu = writer.add_source(PacketStreamSource::new("imu", "imu://0"))?;
        for i in 0..4u8 {
            writer.write_source_packet(cam, &[i; 4], i64::from(i) * 100, None)?;
            writer.write_source_packet(imu, &vec![i; usize::from(i) + 1], i64::from(i) * 100 + 50, Some(&json!({"i": i})))?;
        }
        Ok(writer.into_inner()?)
    }

    #[test]
    fn reads_interleaved_sources_in_file_order() -> Result<()> {
        let reader = PacketStreamReader::from_reader(Cursor::new(recording(true)?))?;
        ensure!(reader.sources().len() == 2);
        ensure!(reader.total_frames(0) == Some(4));
        ensure!(reader.total_frames(1) == Some(4));
        ensure!(reader.total_frames(2).is_none());

        let mut seen = Vec::new();
        while let Some(mut packet) = reader.next_frame()? {
            let payload = packet.read_payload()?;
            seen.push((packet.src, packet.sequence_num, packet.time, payload.len(), packet.meta.clone()));
        }
        ensure!(seen.len() == 8);
        ensure!(seen[3] == (1, 1, 150, 2, Some(json!({"i": 1}))));
        ensure!(seen[6] == (0, 3, 300, 4, None));
        Ok(())
    }

    #[test]
    fn dropping_a_packet_skips_its_payload() -> Result<()> {
        let reader = PacketStreamReader::from_reader(Cursor::new(recording(true)?))?;
        {
            let mut packet = reader.next_frame()?.context("first frame")?;
            let mut first = [0u8; 1];
            packet.read_exact(&mut first)?;
            ensure!(packet.remaining() == 3);
        }
        let packet = reader.next_frame()?.context("second frame")?;
        ensure!(packet.src == 1 && packet.sequence_num == 0);
        Ok(())
    }

    #[test]
    fn over_reading_a_payload_is_not_corruption() -> Result<()> {
        let reader = PacketStreamReader::from_reader(Cursor::new(recording(true)?))?;
        let mut packet = reader.next_frame()?.context("first frame")?;
        let mut too_big = [0u8; 5];
        let result = packet.read_exact(&mut too_big);
        ensure!(
            matches!(result, Err(PacketStreamError::PayloadExhausted { requested: 5, available: 4 })),
            "got {:?}",
            result
        );
        ensure!(!result.err().is_some_and(|e| e.is_corruption()));
        ensure!(packet.read_payload()? == vec![0u8; 4], "payload untouched by the rejected read");
        Ok(())
    }

    #[test]
    fn reentrant_call_invalidates_outstanding_packet() -> Result<()> {
        let reader = PacketStreamReader::from_reader(Cursor::new(recording(true)?))?;
        let mut stale = reader.next_frame()?.context("first frame")?;
        let mut next = reader.next_frame()?.context("second frame")?;
        ensure!(!stale.is_valid());
        ensure!(matches!(stale.read_payload(), Err(PacketStreamError::PacketInvalidated)));
        ensure!(next.read_payload()? == vec![0u8]);
        drop(stale);
        drop(next);
        let third = reader.next_frame()?.context("third frame")?;
        ensure!(third.src == 0 && third.sequence_num == 1);
        Ok(())
    }

    #[test]
    fn seek_realigns_all_sources() -> Result<()> {
        let reader = PacketStreamReader::from_reader(Cursor::new(recording(true)?))?;
        ensure!(reader.seek(1, 2)? == 2);
        ensure!(reader.current_frame_id(1) == Some(2));
        ensure!(reader.current_frame_id(0) == Some(3));

        let mut packet = reader.next_frame()?.context("frame after seek")?;
        ensure!(packet.src == 1 && packet.sequence_num == 2 && packet.time == 250);
        ensure!(packet.read_payload()? == vec![2u8; 3]);
        drop(packet);

        ensure!(reader.seek_to_time(0, 101)? == 2);
        let packet = reader.next_frame()?.context("frame after time seek")?;
        ensure!(packet.src == 0 && packet.time == 200);
        drop(packet);

        ensure!(reader.seek_to_time(0, 10_000)? == 3, "position kept past the last frame");
        ensure!(matches!(reader.seek(0, 9), Err(PacketStreamError::FrameNotIndexed { indexed: 4, .. })));
        ensure!(matches!(reader.seek(5, 0), Err(PacketStreamError::InvalidSource { .. })));
        Ok(())
    }

    #[test]
    fn missing_footer_is_rebuilt_in_memory() -> Result<()> {
        let indexed = PacketStreamReader::from_reader(Cursor::new(recording(true)?))?;
        let rebuilt = PacketStreamReader::from_reader(Cursor::new(recording(false)?))?;
        for src in 0..2 {
            let a: Vec<_> = indexed.source(src).context("source")?.index;
            let b: Vec<_> = rebuilt.source(src).context("source")?.index;
            ensure!(a == b, "index of source {} differs: {:?} vs {:?}", src, a, b);
        }
        ensure!(rebuilt.current_frame_id(0) == Some(0));
        let first = rebuilt.next_frame()?.context("first frame")?;
        ensure!(first.sequence_num == 0);
        Ok(())
    }

    #[test]
    fn sequential_streams_read_but_do_not_seek() -> Result<()> {
        let reader = PacketStreamReader::from_sequential(Cursor::new(recording(true)?))?;
        ensure!(!reader.is_seekable());
        ensure!(matches!(reader.seek(0, 1), Err(PacketStreamError::NotSeekable { .. })));

        let mut count = 0;
        while let Some(packet) = reader.next_frame()? {
            ensure!(packet.frame_streampos.is_none());
            count += 1;
        }
        ensure!(count == 8);
        ensure!(reader.total_frames(0) == Some(4), "statistics block is read at the end");
        Ok(())
    }

    #[test]
    fn bad_magic_is_rejected() {
        let result = PacketStreamReader::from_reader(Cursor::new(b"PANGA LIN {}".to_vec()));
        assert!(matches!(result, Err(PacketStreamError::BadMagic { .. })));
    }

    #[test]
    fn metadata_for_other_source_is_a_format_error() -> Result<()> {
        let mut bytes = recording(false)?;
        // The first metadata block belongs to imu; claim it for cam instead.
        let jsn = bytes.windows(3).position(|w| w == b"JSN").context("metadata block")?;
        bytes[jsn + 3] = 0;
        let reader = PacketStreamReader::from_sequential(Cursor::new(bytes))?;
        drop(reader.next_frame()?);
        ensure!(matches!(reader.next_frame(), Err(PacketStreamError::Parse { .. })));
        Ok(())
    }

    #[test]
    fn close_invalidates_the_reader() -> Result<()> {
        let reader = PacketStreamReader::from_reader(Cursor::new(recording(true)?))?;
        reader.close();
        ensure!(!reader.good());
        ensure!(reader.next_frame()?.is_none());
        ensure!(reader.sources().is_empty());
        Ok(())
    }
}
