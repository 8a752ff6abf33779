//! Tag alphabet of the `.pango` container.
//!
//! Every structural element of a recording starts with a three byte ASCII
//! tag. Tags are packed little-endian into the low 24 bits of a `u32`, so
//! `Tag::from_bytes(*b"PKT")` compares equal to [`Tag::SRC_PACKET`].

use std::fmt;

/// Number of bytes a tag occupies on disk.
pub const TAG_LENGTH: usize = 3;

/// File magic written before the first tag.
pub const PANGO_MAGIC: &[u8; 5] = b"PANGO";

/// A three byte structural opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u32);

const fn pack(bytes: [u8; TAG_LENGTH]) -> u32 {
    (bytes[2] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[0] as u32
}

impl Tag {
    /// Stream header (JSON object with start time and version).
    pub const PANGO_HDR: Tag = Tag(pack(*b"LIN"));
    /// First three bytes of the file magic.
    pub const PANGO_MAGIC: Tag = Tag(pack(*b"PAN"));
    /// Resynchronisation marker, no payload.
    pub const PANGO_SYNC: Tag = Tag(pack(*b"SYN"));
    /// Statistics block holding the serialized packet index.
    pub const PANGO_STATS: Tag = Tag(pack(*b"STA"));
    /// Footer pointing back at the statistics block.
    pub const PANGO_FOOTER: Tag = Tag(pack(*b"FTR"));
    /// Source descriptor.
    pub const ADD_SOURCE: Tag = Tag(pack(*b"SRC"));
    /// Per-packet JSON metadata, always followed by a packet of the same source.
    pub const SRC_JSON: Tag = Tag(pack(*b"JSN"));
    /// Packet header and payload.
    pub const SRC_PACKET: Tag = Tag(pack(*b"PKT"));
    /// End of stream.
    pub const END: Tag = Tag(pack(*b"END"));

    /// Every tag a well-formed stream may contain.
    pub const ALL: [Tag; 9] = [
        Tag::PANGO_SYNC,
        Tag::ADD_SOURCE,
        Tag::SRC_JSON,
        Tag::SRC_PACKET,
        Tag::PANGO_STATS,
        Tag::PANGO_FOOTER,
        Tag::END,
        Tag::PANGO_HDR,
        Tag::PANGO_MAGIC,
    ];

    /// Pack three raw bytes into a tag.
    pub const fn from_bytes(bytes: [u8; TAG_LENGTH]) -> Self {
        Tag(pack(bytes))
    }

    /// The on-disk byte representation.
    pub const fn to_bytes(self) -> [u8; TAG_LENGTH] {
        [self.0 as u8, (self.0 >> 8) as u8, (self.0 >> 16) as u8]
    }

    /// The packed 24-bit value.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this value is a member of the tag alphabet.
    pub fn is_valid(self) -> bool {
        Tag::ALL.contains(&self)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}
