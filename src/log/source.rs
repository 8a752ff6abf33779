//! Source descriptors and the per-stream source table.
//!
//! A source is one logical producer of packets (a camera, an IMU, ...).
//! Sources are identified by a dense integer id handed out when they are
//! registered; ids are never reused within one stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PacketStreamError, Result};

/// Dense identifier of a source within one stream.
pub type SourceId = usize;

/// Location and capture time of one packet of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    /// Byte offset of the first byte of the frame (metadata tag inclusive).
    pub pos: u64,
    /// Capture timestamp in microseconds.
    pub capture_time: i64,
}

/// One logical producer of packets within a stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PacketStreamSource {
    /// Name of the producing component, e.g. `raw_video`.
    pub driver: String,
    /// Assigned at registration; position in the [`SourceTable`].
    pub id: SourceId,
    /// Locator of the original device or stream.
    pub uri: String,
    /// Arbitrary device/stream properties.
    pub info: Value,
    /// Version of the packet layout.
    pub version: i64,
    /// Payload alignment requested by the producer.
    pub data_alignment_bytes: usize,
    /// Packet schema description.
    pub data_definitions: String,
    /// Fixed payload size, or 0 when every packet carries its own length.
    pub data_size_bytes: usize,
    /// Sequence number the next packet read or written will receive.
    pub next_packet_id: usize,
    /// One entry per packet, in sequence order.
    pub index: Vec<PacketInfo>,
}

/// Wire form of a source descriptor, as stored after an `SRC` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SourceRecord {
    pub driver: String,
    pub id: SourceId,
    pub uri: String,
    #[serde(default)]
    pub info: Value,
    #[serde(default)]
    pub version: i64,
    pub packet: PacketLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PacketLayout {
    #[serde(default)]
    pub alignment_bytes: usize,
    #[serde(default)]
    pub definitions: String,
    #[serde(default)]
    pub size_bytes: usize,
}

impl PacketStreamSource {
    /// Describe a new source. The id is assigned when it is added to a stream.
    pub fn new(driver: impl Into<String>, uri: impl Into<String>) -> Self {
        Self { driver: driver.into(), uri: uri.into(), version: 1, ..Default::default() }
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = info;
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Declare fixed-size packets of `size_bytes` (0 keeps packets variable-length).
    pub fn with_fixed_size(mut self, size_bytes: usize) -> Self {
        self.data_size_bytes = size_bytes;
        self
    }

    pub fn with_alignment(mut self, alignment_bytes: usize) -> Self {
        self.data_alignment_bytes = alignment_bytes;
        self
    }

    pub fn with_definitions(mut self, definitions: impl Into<String>) -> Self {
        self.data_definitions = definitions.into();
        self
    }

    /// Whether packets omit their length on the wire.
    pub fn is_fixed_size(&self) -> bool {
        self.data_size_bytes != 0
    }

    /// Byte offset of packet `packet_id`, if it has been indexed.
    pub fn find_seek_location(&self, packet_id: usize) -> Option<u64> {
        self.index.get(packet_id).map(|info| info.pos)
    }

    /// Index of the first packet captured at or after `time_us`.
    pub fn find_first_at_or_after(&self, time_us: i64) -> Option<usize> {
        let i = self.index.partition_point(|info| info.capture_time < time_us);
        (i < self.index.len()).then_some(i)
    }

    pub(crate) fn to_record(&self) -> SourceRecord {
        SourceRecord {
            driver: self.driver.clone(),
            id: self.id,
            uri: self.uri.clone(),
            info: self.info.clone(),
            version: self.version,
            packet: PacketLayout {
                alignment_bytes: self.data_alignment_bytes,
                definitions: self.data_definitions.clone(),
                size_bytes: self.data_size_bytes,
            },
        }
    }

    pub(crate) fn apply_record(&mut self, record: SourceRecord) {
        self.driver = record.driver;
        self.id = record.id;
        self.uri = record.uri;
        self.info = record.info;
        self.version = record.version;
        self.data_alignment_bytes = record.packet.alignment_bytes;
        self.data_definitions = record.packet.definitions;
        self.data_size_bytes = record.packet.size_bytes;
    }
}

/// How far past the last known source a recorded descriptor id may point.
pub(crate) const MAX_SOURCE_GAP: usize = 1024;

/// Registered sources of one open stream, indexed by [`SourceId`].
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    sources: Vec<PacketStreamSource>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under the next dense id and return that id.
    pub fn add(&mut self, mut source: PacketStreamSource) -> SourceId {
        let id = self.sources.len();
        source.id = id;
        self.sources.push(source);
        id
    }

    /// Store a descriptor under an id recorded in the stream.
    ///
    /// Slots between the current end and `id` are filled with placeholders;
    /// a packet index already loaded for the slot is kept. Ids more than
    /// [`MAX_SOURCE_GAP`] past the end are rejected as corrupt.
    pub(crate) fn insert_record(&mut self, record: SourceRecord) -> Result<SourceId> {
        let id = record.id;
        if id > self.sources.len().saturating_add(MAX_SOURCE_GAP) {
            return Err(PacketStreamError::parse(
                "source descriptor",
                format!("source id {} out of range ({} sources known)", id, self.sources.len()),
            ));
        }
        self.ensure_len(id + 1);
        self.sources[id].apply_record(record);
        Ok(id)
    }

    /// Grow the table to `len` placeholder slots.
    pub(crate) fn ensure_len(&mut self, len: usize) {
        if self.sources.len() < len {
            let start = self.sources.len();
            self.sources.resize_with(len, PacketStreamSource::default);
            for (id, source) in self.sources.iter_mut().enumerate().skip(start) {
                source.id = id;
            }
        }
    }

    pub fn get(&self, id: SourceId) -> Option<&PacketStreamSource> {
        self.sources.get(id)
    }

    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut PacketStreamSource> {
        self.sources.get_mut(id)
    }

    /// Like [`get`](Self::get) but an `InvalidSource` error for unknown ids.
    pub fn require(&self, id: SourceId) -> Result<&PacketStreamSource> {
        let known = self.sources.len();
        self.sources.get(id).ok_or(PacketStreamError::InvalidSource { id, known })
    }

    pub fn require_mut(&mut self, id: SourceId) -> Result<&mut PacketStreamSource> {
        let known = self.sources.len();
        self.sources.get_mut(id).ok_or(PacketStreamError::InvalidSource { id, known })
    }

    /// First source produced by `driver` (linear scan).
    pub fn find_by_driver(&self, driver: &str) -> Option<&PacketStreamSource> {
        self.sources.iter().find(|s| s.driver == driver)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PacketStreamSource> {
        self.sources.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, PacketStreamSource> {
        self.sources.iter_mut()
    }

    pub fn as_slice(&self) -> &[PacketStreamSource] {
        &self.sources
    }

    pub(crate) fn clear(&mut self) {
        self.sources.clear();
    }
}
