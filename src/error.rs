//! Error types for packet-stream reading, writing and playback.
//!
//! ## Error Categories
//!
//! - **File Errors**: the recording could not be opened, created or read
//! - **Format Errors**: the bytes do not follow the `.pango` framing (bad magic,
//!   tag mismatch, malformed JSON blocks)
//! - **Truncation**: the stream ended in the middle of a record
//! - **Access Errors**: invalid source ids, seeks on pipes, frames that are not indexed
//! - **Playback Errors**: seek interruptions on a shared [`SyncTime`](crate::SyncTime)
//!
//! Ordinary end-of-stream is never an error: readers report it as `Ok(None)`.
//!
//! ```rust
//! use pango_log::{PacketStreamError, Tag};
//!
//! let error = PacketStreamError::tag_mismatch(Tag::SRC_PACKET, Tag::PANGO_STATS, Some(42));
//! assert!(!error.is_recoverable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::log::{SourceId, Tag};

/// Result type alias for packet-stream operations.
pub type Result<T, E = PacketStreamError> = std::result::Result<T, E>;

/// Main error type for packet-stream operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PacketStreamError {
    #[error("Packet stream file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognised or corrupted file header: {details}")]
    BadMagic { details: String },

    #[error("Tag mismatch error: expected tag '{expected}' but found '{found}'{}", offset_suffix(.offset))]
    TagMismatch { expected: Tag, found: Tag, offset: Option<u64> },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Malformed JSON in {context}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stream truncated while reading {context}")]
    Truncated { context: String },

    #[error("Invalid packet source id {id} ({known} sources known)")]
    InvalidSource { id: SourceId, known: usize },

    #[error("{operation} requires a seekable stream (probably a pipe)")]
    NotSeekable { operation: String },

    #[error("Frame {frame} of source {source_id} is not indexed ({indexed} frames known)")]
    FrameNotIndexed { source_id: SourceId, frame: usize, indexed: usize },

    #[error("Fixed-size source {source_id} expects {expected} byte packets, got {actual}")]
    PacketSize { source_id: SourceId, expected: usize, actual: usize },

    #[error("Packet metadata must be a JSON object, array, string or bool: {details}")]
    InvalidMetadata { details: String },

    #[error("Requested {requested} bytes but only {available} remain in the packet payload")]
    PayloadExhausted { requested: usize, available: usize },

    #[error("Packet was invalidated by a later read on the same thread")]
    PacketInvalidated,

    #[error("Writer is closed")]
    WriterClosed,

    #[error("Time queue invalidated by seek")]
    SeekInterrupted,

    #[error("No playback event queued at {time_us}us")]
    EventNotQueued { time_us: i64 },

    #[error("Playback task failed: {details}")]
    Playback { details: String },

    #[error("Configuration error for '{key}': {details}")]
    Config { key: String, details: String },
}

fn offset_suffix(offset: &Option<u64>) -> String {
    match offset {
        Some(offset) => format!(" at offset {}", offset),
        None => String::new(),
    }
}

impl PacketStreamError {
    /// Returns whether retrying the operation (or continuing with the stream) can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PacketStreamError::File { .. } => false,
            PacketStreamError::BadMagic { .. } => false,
            PacketStreamError::TagMismatch { .. } => false,
            PacketStreamError::Parse { .. } => false,
            PacketStreamError::Json { .. } => false,
            PacketStreamError::Truncated { .. } => true,
            PacketStreamError::InvalidSource { .. } => false,
            PacketStreamError::NotSeekable { .. } => false,
            PacketStreamError::FrameNotIndexed { .. } => true,
            PacketStreamError::PacketSize { .. } => true,
            PacketStreamError::InvalidMetadata { .. } => true,
            PacketStreamError::PayloadExhausted { .. } => true,
            PacketStreamError::PacketInvalidated => true,
            PacketStreamError::WriterClosed => false,
            PacketStreamError::SeekInterrupted => true,
            PacketStreamError::EventNotQueued { .. } => false,
            PacketStreamError::Playback { .. } => true,
            PacketStreamError::Config { .. } => false,
        }
    }

    /// Whether this error means the recording is corrupt or truncated.
    ///
    /// Applications typically translate these into a single "corrupt or
    /// truncated recording" message.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PacketStreamError::BadMagic { .. }
                | PacketStreamError::TagMismatch { .. }
                | PacketStreamError::Parse { .. }
                | PacketStreamError::Json { .. }
                | PacketStreamError::Truncated { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PacketStreamError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
                "Ensure sufficient disk space when recording",
            ],
            PacketStreamError::BadMagic { .. } => {
                vec!["Verify the file is a .pango recording", "Re-record the stream"]
            }
            PacketStreamError::TagMismatch { .. }
            | PacketStreamError::Parse { .. }
            | PacketStreamError::Json { .. } => vec![
                "The recording is corrupt; try playing it from the start",
                "Rebuild the index with fix_file_index()",
            ],
            PacketStreamError::Truncated { .. } => vec![
                "The recording may still be being written; retry later",
                "Treat the remaining data as lost",
            ],
            PacketStreamError::InvalidSource { .. } => {
                vec!["List available sources with sources()", "Check the source id"]
            }
            PacketStreamError::NotSeekable { .. } => vec![
                "Read the stream sequentially",
                "Record to a regular file to enable random access",
            ],
            PacketStreamError::FrameNotIndexed { .. } => vec![
                "Check total_frames() before seeking",
                "Retry once more data has been recorded",
            ],
            PacketStreamError::PacketSize { .. } => {
                vec!["Write payloads matching the declared data_size_bytes"]
            }
            PacketStreamError::InvalidMetadata { .. } => {
                vec!["Wrap scalar metadata in a JSON object"]
            }
            PacketStreamError::PayloadExhausted { .. } => {
                vec!["Check remaining() before reading", "Use read_payload() for the whole payload"]
            }
            PacketStreamError::PacketInvalidated => {
                vec!["Finish reading a packet before requesting the next one"]
            }
            PacketStreamError::WriterClosed => vec!["Open a new writer"],
            PacketStreamError::SeekInterrupted => vec!["Re-queue the event after the seek"],
            PacketStreamError::EventNotQueued { .. } => {
                vec!["Queue the event before waiting on it", "Use SyncTimeEventPromise"]
            }
            PacketStreamError::Playback { .. } => vec!["Reopen the replay connection"],
            PacketStreamError::Config { .. } => vec!["Check the configuration value type"],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PacketStreamError::File { path: path.into(), source }
    }

    /// Helper constructor for tag mismatches.
    pub fn tag_mismatch(expected: Tag, found: Tag, offset: Option<u64>) -> Self {
        PacketStreamError::TagMismatch { expected, found, offset }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        PacketStreamError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for JSON errors.
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        PacketStreamError::Json { context: context.into(), source }
    }

    /// Helper constructor for truncation.
    pub fn truncated(context: impl Into<String>) -> Self {
        PacketStreamError::Truncated { context: context.into() }
    }

    /// Helper constructor for operations needing random access.
    pub fn not_seekable(operation: impl Into<String>) -> Self {
        PacketStreamError::NotSeekable { operation: operation.into() }
    }
}

impl From<std::io::Error> for PacketStreamError {
    fn from(err: std::io::Error) -> Self {
        PacketStreamError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            context in "\\w+",
            details in ".*",
            offset in 0u64..0x1_0000_0000u64,
            id in 0usize..64usize,
          ) {
            let parse = PacketStreamError::parse(context.clone(), details.clone());
            let msg = parse.to_string();
            prop_assert!(msg.contains(&context));
            prop_assert!(msg.contains(&details));

            let mismatch = PacketStreamError::tag_mismatch(Tag::SRC_PACKET, Tag::END, Some(offset));
            let msg = mismatch.to_string();
            prop_assert!(msg.contains("PKT"));
            prop_assert!(msg.contains("END"));
            prop_assert!(msg.contains(&offset.to_string()));

            let invalid = PacketStreamError::InvalidSource { id, known: 0 };
            prop_assert!(invalid.to_string().contains(&id.to_string()));
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<PacketStreamError>();

        let error = PacketStreamError::truncated("packet payload");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn corruption_classification() {
        assert!(PacketStreamError::tag_mismatch(Tag::ADD_SOURCE, Tag::END, None).is_corruption());
        assert!(PacketStreamError::truncated("x").is_corruption());
        assert!(!PacketStreamError::not_seekable("seek").is_corruption());
        assert!(!PacketStreamError::WriterClosed.is_corruption());
        assert!(!PacketStreamError::PayloadExhausted { requested: 8, available: 4 }.is_corruption());

        for error in [
            PacketStreamError::truncated("x"),
            PacketStreamError::not_seekable("seek"),
            PacketStreamError::SeekInterrupted,
        ] {
            assert!(!error.recovery_suggestions().is_empty());
        }
    }

    #[test]
    fn from_io_error_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        match PacketStreamError::from(io_err) {
            PacketStreamError::File { source, .. } => assert_eq!(source.to_string(), "short read"),
            other => panic!("Expected File error variant, got {:?}", other),
        }
    }

    #[test]
    fn mismatch_without_offset_has_no_suffix() {
        let msg = PacketStreamError::tag_mismatch(Tag::PANGO_HDR, Tag::ADD_SOURCE, None).to_string();
        assert!(!msg.contains("offset"));
    }
}
