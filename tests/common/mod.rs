//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pango_log::{PacketStreamSource, PacketStreamWriter, SourceId};

pub const PAYLOAD_LEN: usize = 12;

/// Route library logs to the test harness; set `RUST_LOG=pango_log=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Golden payload of packet `i`: `HELLOWORLD` followed by `i` as two digits.
pub fn payload(i: usize) -> [u8; PAYLOAD_LEN] {
    let mut payload = *b"HELLOWORLD!!";
    payload[10] = b'0' + ((i / 10) % 10) as u8;
    payload[11] = b'0' + (i % 10) as u8;
    payload
}

pub fn fixed_source() -> PacketStreamSource {
    PacketStreamSource::new("test", "synthetic://0").with_fixed_size(PAYLOAD_LEN)
}

/// In-memory recording of one fixed-size source, one packet per time.
///
/// Also returns the frame offsets the writer indexed.
pub fn recording_with_offsets(times: &[i64], indexable: bool) -> Result<(Vec<u8>, Vec<u64>)> {
    let mut writer = PacketStreamWriter::from_writer(Vec::new(), indexable)?;
    let src: SourceId = writer.add_source(fixed_source())?;
    for (i, &time) in times.iter().enumerate() {
        writer.write_source_packet(src, &payload(i), time, None)?;
    }
    let offsets = writer.sources()[src].index.iter().map(|info| info.pos).collect();
    Ok((writer.into_inner()?, offsets))
}

pub fn recording(times: &[i64], indexable: bool) -> Result<Vec<u8>> {
    Ok(recording_with_offsets(times, indexable)?.0)
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Times `0, step, 2 * step, ...` for `count` packets.
pub fn evenly_spaced(count: usize, step: i64) -> Vec<i64> {
    (0..count as i64).map(|i| i * step).collect()
}
