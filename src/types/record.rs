//! Owned packet records

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::Result;
use crate::log::{Packet, SourceId};

/// A fully read packet, detached from its reader
///
/// This is the unit that flows through the replay layer; the payload is
/// shared so fan-out to several subscribers does not copy it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketRecord {
    /// Source the packet belongs to
    pub src: SourceId,

    /// Per-source sequence number
    pub sequence_num: usize,

    /// Capture timestamp in microseconds
    pub time_us: i64,

    /// Metadata written before the packet, if any
    pub meta: Option<Value>,

    /// Payload bytes
    pub payload: Arc<[u8]>,
}

impl PacketRecord {
    /// Read the remaining payload of `packet` into an owned record
    pub fn from_packet(packet: &mut Packet<'_>) -> Result<Self> {
        let payload = packet.read_payload()?;
        Ok(Self {
            src: packet.src,
            sequence_num: packet.sequence_num,
            time_us: packet.time,
            meta: packet.meta.take(),
            payload: payload.into(),
        })
    }
}
