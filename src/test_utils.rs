//! Test utilities for building synthetic recordings
//!
//! Unit tests and benchmarks need small, well-known `.pango` streams. They
//! are generated in memory rather than checked in.

#![cfg(any(test, feature = "benchmark"))]

use std::path::Path;

use crate::log::{PacketStreamSource, PacketStreamWriter};
use crate::{PacketStreamError, Result};

/// Payload every synthetic packet is derived from.
pub const BASE_PAYLOAD: &[u8; 12] = b"HELLOWORLD!!";

/// Builder for a single-source recording with fixed 12 byte packets.
#[derive(Debug, Clone)]
pub struct SyntheticRecording {
    driver: String,
    uri: String,
    times: Vec<i64>,
    indexable: bool,
}

impl Default for SyntheticRecording {
    fn default() -> Self {
        Self {
            driver: "test".to_string(),
            uri: "synthetic://0".to_string(),
            times: vec![0, 10, 20, 30, 40],
            indexable: true,
        }
    }
}

impl SyntheticRecording {
    pub fn new() -> Self {
        Self::default()
    }

    /// One packet per capture time.
    pub fn with_times(mut self, times: Vec<i64>) -> Self {
        self.times = times;
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Leave out the statistics block and footer.
    pub fn without_index(mut self) -> Self {
        self.indexable = false;
        self
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Payload of packet `i`: the base payload with its last two bytes
    /// replaced by `i` in decimal.
    pub fn payload(i: usize) -> [u8; 12] {
        let mut payload = *BASE_PAYLOAD;
        payload[10] = b'0' + ((i / 10) % 10) as u8;
        payload[11] = b'0' + (i % 10) as u8;
        payload
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = PacketStreamWriter::from_writer(Vec::new(), self.indexable)?;
        let src = writer.add_source(
            PacketStreamSource::new(self.driver.as_str(), self.uri.as_str()).with_fixed_size(BASE_PAYLOAD.len()),
        )?;
        for (i, &time_us) in self.times.iter().enumerate() {
            writer.write_source_packet(src, &Self::payload(i), time_us, None)?;
        }
        writer.into_inner()
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| PacketStreamError::file_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_differ_per_packet() {
        assert_eq!(&SyntheticRecording::payload(0), b"HELLOWORLD00");
        assert_eq!(&SyntheticRecording::payload(42), b"HELLOWORLD42");
        assert_ne!(SyntheticRecording::payload(1), SyntheticRecording::payload(2));
    }
}
