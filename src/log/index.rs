//! Per-source frame number to byte offset mapping.
//!
//! The index is what makes random access possible: a writer records the
//! offset of every packet and stores the whole mapping in the statistics
//! block at the end of the file, so a reader can seek to any frame without
//! scanning the recording.
//!
//! On disk it is a JSON array of arrays: the outer array is ordered by
//! source id, each inner array lists byte offsets in frame order.

use std::collections::BTreeMap;

use serde_json::Value;

use super::source::{PacketInfo, PacketStreamSource, SourceId};
use crate::{PacketStreamError, Result};

/// Mapping `source -> (frame -> byte offset)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketIndex {
    sources: BTreeMap<SourceId, BTreeMap<usize, u64>>,
}

impl PacketIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from the per-source packet lists of a stream.
    pub fn from_sources(sources: &[PacketStreamSource]) -> Self {
        let mut index = Self::new();
        for source in sources {
            let frames = index.sources.entry(source.id).or_default();
            for (frame, info) in source.index.iter().enumerate() {
                frames.insert(frame, info.pos);
            }
        }
        index
    }

    /// Rebuild an index from its stored array-of-arrays form.
    pub fn from_json(value: &Value) -> Result<Self> {
        let rows = value.as_array().ok_or_else(|| {
            PacketStreamError::parse("packet index", "expected an array of per-source arrays")
        })?;

        let mut index = Self::new();
        for (source, row) in rows.iter().enumerate() {
            let row = row.as_array().ok_or_else(|| {
                PacketStreamError::parse(
                    "packet index",
                    format!("entry for source {} is not an array", source),
                )
            })?;
            index.sources.entry(source).or_default();
            for (frame, pos) in row.iter().enumerate() {
                let pos = pos.as_u64().ok_or_else(|| {
                    PacketStreamError::parse(
                        "packet index",
                        format!("offset of frame {} of source {} is not an unsigned integer", frame, source),
                    )
                })?;
                index.add_at(source, frame, pos);
            }
        }
        Ok(index)
    }

    /// Serialize as an array of arrays, sources in id order.
    ///
    /// Ids missing from the index are written as empty rows so that row
    /// position keeps matching the source id.
    pub fn to_json(&self) -> Value {
        let rows = match self.sources.keys().next_back() {
            Some(&last) => last + 1,
            None => 0,
        };
        let mut out = Vec::with_capacity(rows);
        for source in 0..rows {
            let positions = self
                .sources
                .get(&source)
                .map(|frames| frames.values().map(|&pos| Value::from(pos)).collect())
                .unwrap_or_default();
            out.push(Value::Array(positions));
        }
        Value::Array(out)
    }

    /// Whether frame `frame` of `source` is indexed.
    pub fn has(&self, source: SourceId, frame: usize) -> bool {
        self.sources.get(&source).is_some_and(|frames| frames.contains_key(&frame))
    }

    /// Byte offset of frame `frame` of `source`.
    pub fn position(&self, source: SourceId, frame: usize) -> Option<u64> {
        self.sources.get(&source)?.get(&frame).copied()
    }

    /// Number of indexed frames, or `None` if the source is unknown.
    ///
    /// Callers such as scrubbers treat `None` as "length unknown".
    pub fn packet_count(&self, source: SourceId) -> Option<usize> {
        self.sources.get(&source).map(BTreeMap::len)
    }

    /// Insert or overwrite an explicit frame number.
    pub fn add_at(&mut self, source: SourceId, frame: usize, pos: u64) {
        self.sources.entry(source).or_default().insert(frame, pos);
    }

    /// Append `pos` as the frame after the highest indexed one (0 if none).
    ///
    /// Returns the frame number used.
    pub fn add(&mut self, source: SourceId, pos: u64) -> usize {
        let frames = self.sources.entry(source).or_default();
        let frame = frames.keys().next_back().map_or(0, |last| last + 1);
        frames.insert(frame, pos);
        frame
    }

    /// Number of sources with an entry.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Offsets of `source` in frame order.
    pub fn positions(&self, source: SourceId) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.sources.get(&source).into_iter().flat_map(|frames| frames.iter().map(|(&f, &p)| (f, p)))
    }
}

/// Combine stored offsets and capture times into per-source packet lists.
///
/// Both arrays must have one row per source and matching row lengths.
pub(crate) fn packet_infos_from_json(
    positions: &Value,
    times: &Value,
) -> Result<Vec<Vec<PacketInfo>>> {
    let index = PacketIndex::from_json(positions)?;
    let time_rows = times.as_array().ok_or_else(|| {
        PacketStreamError::parse("packet times", "expected an array of per-source arrays")
    })?;

    let rows = positions.as_array().map_or(0, Vec::len);
    if rows != time_rows.len() {
        return Err(PacketStreamError::parse(
            "packet index",
            format!("{} offset rows but {} time rows", rows, time_rows.len()),
        ));
    }

    let mut out = Vec::with_capacity(rows);
    for (source, time_row) in time_rows.iter().enumerate() {
        let time_row = time_row.as_array().ok_or_else(|| {
            PacketStreamError::parse("packet times", format!("row {} is not an array", source))
        })?;
        let count = index.packet_count(source).unwrap_or(0);
        if count != time_row.len() {
            return Err(PacketStreamError::parse(
                "packet index",
                format!("source {} has {} offsets but {} times", source, count, time_row.len()),
            ));
        }
        let infos = index
            .positions(source)
            .zip(time_row)
            .map(|((_, pos), time)| {
                let capture_time = time.as_i64().ok_or_else(|| {
                    PacketStreamError::parse("packet times", "capture time is not an integer")
                })?;
                Ok(PacketInfo { pos, capture_time })
            })
            .collect::<Result<Vec<_>>>()?;
        out.push(infos);
    }
    Ok(out)
}

/// Serialize per-source capture times as an array of arrays.
pub(crate) fn packet_times_to_json(sources: &[PacketStreamSource]) -> Value {
    Value::Array(
        sources
            .iter()
            .map(|s| Value::Array(s.index.iter().map(|i| Value::from(i.capture_time)).collect()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn add_appends_after_highest_frame() {
        let mut index = PacketIndex::new();
        assert_eq!(index.add(0, 10), 0);
        assert_eq!(index.add(0, 20), 1);
        index.add_at(0, 5, 60);
        assert_eq!(index.add(0, 70), 6);
        assert_eq!(index.packet_count(0), Some(4));
        assert_eq!(index.position(0, 5), Some(60));
        assert!(index.has(0, 6));
        assert!(!index.has(0, 2));
        assert!(!index.has(1, 0));
        assert_eq!(index.packet_count(1), None);
    }

    #[test]
    fn json_keeps_row_position_for_missing_sources() {
        let mut index = PacketIndex::new();
        index.add(0, 11);
        index.add(2, 33);
        index.add(2, 44);
        assert_eq!(index.to_json(), json!([[11], [], [33, 44]]));

        let restored = PacketIndex::from_json(&index.to_json()).unwrap();
        assert_eq!(restored.position(2, 1), Some(44));
        assert_eq!(restored.packet_count(1), Some(0));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(PacketIndex::from_json(&json!({"a": 1})).is_err());
        assert!(PacketIndex::from_json(&json!([[1, -2]])).is_err());
        assert!(PacketIndex::from_json(&json!([3])).is_err());
    }

    #[test]
    fn infos_require_matching_shapes() {
        let infos = packet_infos_from_json(&json!([[5, 9], [7]]), &json!([[0, 10], [3]])).unwrap();
        assert_eq!(infos[0][1], PacketInfo { pos: 9, capture_time: 10 });
        assert_eq!(infos[1][0], PacketInfo { pos: 7, capture_time: 3 });

        assert!(packet_infos_from_json(&json!([[5, 9]]), &json!([[0]])).is_err());
        assert!(packet_infos_from_json(&json!([[5]]), &json!([[0], []])).is_err());
    }

    proptest! {
        #[test]
        fn sequential_adds_survive_json(rows in prop::collection::vec(prop::collection::vec(0u64..1_000_000, 0..20), 0..6)) {
            let mut index = PacketIndex::new();
            for (source, row) in rows.iter().enumerate() {
                index.sources.entry(source).or_default();
                for &pos in row {
                    index.add(source, pos);
                }
            }
            let restored = PacketIndex::from_json(&index.to_json()).unwrap();
            prop_assert_eq!(restored, index);
        }
    }
}
