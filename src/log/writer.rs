//! Recording side of the `.pango` format.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use pango_log::{PacketStreamSource, PacketStreamWriter};
//! use serde_json::json;
//!
//! fn record() -> pango_log::Result<()> {
//!     let mut writer = PacketStreamWriter::create("capture.pango")?;
//!     let imu = writer.add_source(PacketStreamSource::new("imu", "imu://0").with_fixed_size(24))?;
//!
//!     writer.write_source_packet(imu, &[0u8; 24], 1_000, None)?;
//!     writer.write_source_packet(imu, &[1u8; 24], 2_000, Some(&json!({"exposure": 4})))?;
//!
//!     // Writes the statistics block and footer so readers can seek.
//!     writer.close()
//! }
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::index::{PacketIndex, packet_times_to_json};
use super::packet_stream::is_pipe;
use super::source::{PacketInfo, PacketStreamSource, SourceId, SourceTable};
use super::tags::{PANGO_MAGIC, Tag};
use super::varint;
use crate::{PacketStreamError, Result};

/// Number of `SYN` tags emitted by [`PacketStreamWriter::write_sync`].
pub const SYNC_TAG_REPEAT: usize = 10;

/// Write sink that remembers how many bytes went through it.
#[derive(Debug)]
pub(crate) struct CountingWriter<W> {
    inner: W,
    pos: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, pos: 0 }
    }

    fn write_tag(&mut self, tag: Tag) -> io::Result<()> {
        self.write_all(&tag.to_bytes())
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Append the statistics block (`STA`) and the footer (`FTR`) pointing at it.
///
/// `stats_pos` must be the offset at which the `STA` tag lands.
pub(crate) fn write_index_footer<W: Write + ?Sized>(
    out: &mut W,
    stats_pos: u64,
    sources: &[PacketStreamSource],
) -> io::Result<()> {
    let stats = json!({
        "num_sources": sources.len(),
        "src_packet_index": PacketIndex::from_sources(sources).to_json(),
        "src_packet_times": packet_times_to_json(sources),
    });
    out.write_all(&Tag::PANGO_STATS.to_bytes())?;
    serde_json::to_writer(&mut *out, &stats)?;
    out.write_all(&Tag::PANGO_FOOTER.to_bytes())?;
    out.write_all(&stats_pos.to_le_bytes())?;
    Ok(())
}

/// Reject metadata the reader could not delimit without lookahead.
fn validate_meta(meta: &Value) -> Result<()> {
    match meta {
        Value::Object(_) | Value::Array(_) | Value::String(_) | Value::Bool(_) => Ok(()),
        Value::Number(n) => Err(PacketStreamError::InvalidMetadata { details: format!("number {}", n) }),
        Value::Null => Err(PacketStreamError::InvalidMetadata { details: "null".to_string() }),
    }
}

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Single-writer recorder for one `.pango` stream.
///
/// Writing happens through `&mut self`; sharing a writer between threads
/// needs an external lock.
pub struct PacketStreamWriter<W: Write = BufWriter<File>> {
    out: Option<CountingWriter<W>>,
    sources: SourceTable,
    indexable: bool,
    path: Option<PathBuf>,
}

impl PacketStreamWriter<BufWriter<File>> {
    /// Create (or truncate) a recording on disk and write its header.
    ///
    /// FIFOs get no statistics block or footer since their reader cannot seek.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let indexable = !is_pipe(path);
        let file = File::create(path).map_err(|e| PacketStreamError::file_error(path, e))?;
        let mut writer = Self::from_writer(BufWriter::new(file), indexable)?;
        writer.path = Some(path.to_path_buf());
        info!("Recording packet stream to {}", path.display());
        Ok(writer)
    }
}

impl<W: Write> PacketStreamWriter<W> {
    /// Start a stream on any sink.
    ///
    /// `indexable` controls whether [`close`](Self::close) appends the
    /// statistics block and footer; pass `false` for pipes and sockets where
    /// nobody can seek back.
    pub fn from_writer(writer: W, indexable: bool) -> Result<Self> {
        let mut out = CountingWriter::new(writer);
        out.write_all(PANGO_MAGIC)?;
        out.write_tag(Tag::PANGO_HDR)?;
        let header = json!({
            "pangolin_version": env!("CARGO_PKG_VERSION"),
            "time_us": now_us(),
            "date_created": chrono::Local::now().format("%Y-%m-%d %X").to_string(),
            "endian": "little_endian",
        });
        serde_json::to_writer_pretty(&mut out, &header)
            .map_err(|e| PacketStreamError::json("file header", e))?;
        out.write_all(b"\n")?;

        Ok(Self { out: Some(out), sources: SourceTable::new(), indexable, path: None })
    }

    /// Register a source and write its descriptor. Returns the assigned id.
    pub fn add_source(&mut self, source: PacketStreamSource) -> Result<SourceId> {
        let out = self.out.as_mut().ok_or(PacketStreamError::WriterClosed)?;
        let id = self.sources.add(source);
        let record = self.sources.require(id)?.to_record();

        out.write_tag(Tag::ADD_SOURCE)?;
        serde_json::to_writer_pretty(&mut *out, &record)
            .map_err(|e| PacketStreamError::json("source descriptor", e))?;
        out.write_all(b"\n")?;

        debug!("Added source {} ({}, {})", id, record.driver, record.uri);
        Ok(id)
    }

    /// Append one packet of `src`, optionally preceded by a metadata block.
    ///
    /// The frame offset recorded in the index is the position of the
    /// metadata tag when there is one.
    pub fn write_source_packet(
        &mut self,
        src: SourceId,
        data: &[u8],
        time_us: i64,
        meta: Option<&Value>,
    ) -> Result<()> {
        let out = self.out.as_mut().ok_or(PacketStreamError::WriterClosed)?;
        let source = self.sources.require_mut(src)?;

        if source.is_fixed_size() && data.len() != source.data_size_bytes {
            return Err(PacketStreamError::PacketSize {
                source_id: src,
                expected: source.data_size_bytes,
                actual: data.len(),
            });
        }
        if let Some(meta) = meta {
            validate_meta(meta)?;
        }

        let pos = out.pos;
        if let Some(meta) = meta {
            out.write_tag(Tag::SRC_JSON)?;
            varint::write_uint(out, src as u64)?;
            serde_json::to_writer(&mut *out, meta)
                .map_err(|e| PacketStreamError::json("packet metadata", e))?;
        }

        out.write_tag(Tag::SRC_PACKET)?;
        varint::write_timestamp(out, time_us)?;
        varint::write_uint(out, src as u64)?;
        if !source.is_fixed_size() {
            varint::write_uint(out, data.len() as u64)?;
        }
        out.write_all(data)?;

        // Only frames that made it out completely are indexed.
        source.index.push(PacketInfo { pos, capture_time: time_us });
        source.next_packet_id += 1;
        Ok(())
    }

    /// Emit a run of `SYN` tags that readers can resynchronise on.
    pub fn write_sync(&mut self) -> Result<()> {
        let out = self.out.as_mut().ok_or(PacketStreamError::WriterClosed)?;
        for _ in 0..SYNC_TAG_REPEAT {
            out.write_tag(Tag::PANGO_SYNC)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let out = self.out.as_mut().ok_or(PacketStreamError::WriterClosed)?;
        out.flush()?;
        Ok(())
    }

    /// Finish the stream: statistics and footer (when indexable), then flush.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(out) = self.out.take() {
            self.finish_output(out, self.indexable)?;
        }
        Ok(())
    }

    /// Flush and close without writing the statistics block or footer.
    pub fn force_close(&mut self) -> Result<()> {
        if let Some(out) = self.out.take() {
            self.finish_output(out, false)?;
        }
        Ok(())
    }

    /// Close the stream and hand back the underlying sink.
    pub fn into_inner(mut self) -> Result<W> {
        let out = self.out.take().ok_or(PacketStreamError::WriterClosed)?;
        self.finish_output(out, self.indexable)
    }

    fn finish_output(&self, mut out: CountingWriter<W>, footer: bool) -> Result<W> {
        if footer {
            let stats_pos = out.pos;
            write_index_footer(&mut out, stats_pos, self.sources.as_slice())?;
        }
        out.flush()?;
        debug!(
            "Closed packet stream{} after {} bytes ({} sources)",
            self.path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default(),
            out.pos,
            self.sources.len()
        );
        Ok(out.inner)
    }

    /// Whether closing appends the statistics block and footer.
    pub fn is_indexable(&self) -> bool {
        self.indexable
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.out.as_ref().map_or(0, |out| out.pos)
    }

    pub fn sources(&self) -> &[PacketStreamSource] {
        self.sources.as_slice()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl<W: Write> Drop for PacketStreamWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close packet stream writer: {}", e);
        }
    }
}
