//! Provider trait for packet sources

use crate::Result;
use crate::log::PacketStreamSource;
use crate::types::PacketRecord;

/// Trait for asynchronous packet sources
///
/// Providers own their pacing: a replay provider sleeps until each packet
/// is due on its playback clock, so the driver can simply pull in a loop.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Get the next packet
    ///
    /// Returns:
    /// - `Ok(Some(record))` - Packet available
    /// - `Ok(None)` - Stream ended (normal termination)
    /// - `Err(e)` - Error occurred
    async fn next_packet(&mut self) -> Result<Option<PacketRecord>>;

    /// Descriptor of the source this provider replays
    fn source(&self) -> &PacketStreamSource;

    /// Nominal packet rate in Hz, when it can be derived from the index
    fn packet_rate(&self) -> Option<f64>;
}
