//! The `.pango` packet-stream container.
//!
//! A recording is a sequence of tagged records: a header, source
//! descriptors, optional per-frame metadata, packets, resync markers and a
//! trailing statistics block with the packet index.
//!
//! ```text
//! "PANGO"
//! LIN {header json}\n
//! SRC {source json}\n              any number, any position
//! JSN varint(src) {json}           optional, precedes a PKT of the same source
//! PKT i64(time_us) varint(src) [varint(len)] payload
//! SYN                              resync marker
//! STA {statistics json}
//! FTR u64(offset of STA)           last 11 bytes of the file
//! ```
//!
//! All integers are little-endian.

mod index;
mod packet;
mod packet_stream;
mod reader;
mod source;
mod tags;
pub mod varint;
mod writer;

pub use index::PacketIndex;
pub use packet::Packet;
pub use packet_stream::{PacketStream, ReadSeek, is_pipe};
pub use reader::PacketStreamReader;
pub use source::{PacketInfo, PacketStreamSource, SourceId, SourceTable};
pub use tags::{PANGO_MAGIC, TAG_LENGTH, Tag};
pub use writer::{PacketStreamWriter, SYNC_TAG_REPEAT};
