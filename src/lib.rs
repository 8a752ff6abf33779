//! Reader and writer for `.pango` packet-stream recordings.
//!
//! A `.pango` file interleaves packets from several sources (cameras,
//! IMUs, anything that emits timestamped byte blobs) into one tagged,
//! seekable stream with a per-source packet index in its footer.
//!
//! # Features
//!
//! - **Recording**: [`PacketStreamWriter`] appends packets and writes the index on close
//! - **Random access**: [`PacketStreamReader`] seeks by frame or timestamp, per source
//! - **Shared reading**: one reader can be used from many threads; packets
//!   stay valid until their thread asks for the next one
//! - **Robustness**: corrupt regions are skipped by resynchronising on the next tag,
//!   missing indexes are rebuilt
//! - **Synchronised playback**: [`PlaybackSession`] and [`SyncTime`] pace several
//!   sources against one virtual clock
//!
//! ## Example (recording and reading back)
//!
//! ```rust,no_run
//! use pango_log::{PacketStreamReader, PacketStreamSource, PacketStreamWriter};
//!
//! fn main() -> pango_log::Result<()> {
//!     let mut writer = PacketStreamWriter::create("capture.pango")?;
//!     let cam = writer.add_source(PacketStreamSource::new("camera", "v4l:///dev/video0").with_fixed_size(4))?;
//!     writer.write_source_packet(cam, &[1, 2, 3, 4], 0, None)?;
//!     writer.close()?;
//!
//!     let reader = PacketStreamReader::open("capture.pango")?;
//!     while let Some(mut packet) = reader.next_frame()? {
//!         let payload = packet.read_payload()?;
//!         println!("source {} at {}us: {} bytes", packet.src, packet.time, payload.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Example (paced replay)
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use pango_log::{PlaybackSession, ReplayConnection, UpdateRate};
//!
//! #[tokio::main]
//! async fn main() -> pango_log::Result<()> {
//!     let session = PlaybackSession::shared();
//!     let connection = ReplayConnection::open(&session, "capture.pango", 0).await?;
//!     let mut packets = connection.subscribe(UpdateRate::Max(30));
//!
//!     while let Some(packet) = packets.next().await {
//!         println!("{}: {} bytes", packet.time_us, packet.payload.len());
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod log;
pub mod session;
pub mod sync_time;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Stream-based replay architecture
pub mod connection;
pub mod driver;
pub mod provider;
pub mod providers;
pub mod stream;

// Core exports
pub use error::*;
pub use log::{
    Packet, PacketInfo, PacketStream, PacketStreamReader, PacketStreamSource, PacketStreamWriter, SourceId, Tag,
};
pub use types::{PacketRecord, UpdateRate};

// Playback exports
pub use config::Params;
pub use session::PlaybackSession;
pub use sync_time::{SyncTime, SyncTimeEventPromise};

pub use connection::replay::ReplayConnection;
pub use providers::replay::ReplayProvider;
