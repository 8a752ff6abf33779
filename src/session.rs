//! De-duplicated access to recordings for synchronised playback.
//!
//! A [`PlaybackSession`] hands out one shared [`PacketStreamReader`] per
//! file, so every consumer of "the same" recording goes through the same
//! lock, and one [`SyncTime`] that paces all of them.
//!
//! Paths are normalised before lookup: `./a/../rec.pango` and
//! `/abs/path/rec.pango` name the same reader.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::{ORDERED_PLAYBACK, Params};
use crate::log::PacketStreamReader;
use crate::sync_time::SyncTime;
use crate::{PacketStreamError, Result};

/// Process-wide session used for ordered playback.
static SHARED_SESSION: Lazy<Arc<PlaybackSession>> = Lazy::new(|| Arc::new(PlaybackSession::new()));

/// Cache of open readers keyed by normalised path, plus a shared clock.
#[derive(Debug, Default)]
pub struct PlaybackSession {
    readers: Mutex<HashMap<PathBuf, Arc<PacketStreamReader>>>,
    time: Arc<SyncTime>,
}

impl PlaybackSession {
    /// An isolated session with its own readers and clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lazily created process-wide session.
    pub fn shared() -> Arc<PlaybackSession> {
        Arc::clone(&SHARED_SESSION)
    }

    /// The shared session when `ordered_playback` is set, otherwise a fresh one.
    pub fn choose(ordered_playback: bool) -> Arc<PlaybackSession> {
        if ordered_playback { Self::shared() } else { Arc::new(Self::new()) }
    }

    /// [`choose`](Self::choose) driven by the `OrderedPlayback` parameter (default `false`).
    pub fn choose_from_params(params: &Params) -> Result<Arc<PlaybackSession>> {
        Ok(Self::choose(params.get_flag(ORDERED_PLAYBACK, false)?))
    }

    /// Reader for `path`, opening it on first use.
    ///
    /// The cache stays locked while a new reader is opened, so concurrent
    /// first opens of one file still produce a single reader.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Arc<PacketStreamReader>> {
        let key = normalize_path(path.as_ref())?;
        let mut readers = self.readers.lock();
        if let Some(reader) = readers.get(&key) {
            return Ok(Arc::clone(reader));
        }

        let reader = Arc::new(PacketStreamReader::open(&key)?);
        debug!("Session opened {}", key.display());
        readers.insert(key, Arc::clone(&reader));
        Ok(reader)
    }

    pub fn time(&self) -> Arc<SyncTime> {
        Arc::clone(&self.time)
    }

    /// Number of cached readers.
    pub fn len(&self) -> usize {
        self.readers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.lock().is_empty()
    }

    /// Forget every cached reader and reset the clock.
    ///
    /// Readers still held elsewhere stay usable, but a later [`open`](Self::open)
    /// of the same file creates a second, independent reader. Only call this
    /// when no playback is in flight.
    pub fn clear(&self) {
        self.readers.lock().clear();
        self.time.reset();
    }
}

/// Canonical form of `path`, falling back to a lexically cleaned absolute path.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let absolute = std::path::absolute(path).map_err(|e| PacketStreamError::file_error(path, e))?;

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, ensure};

    #[test]
    fn lexical_cleanup_for_missing_files() -> Result<()> {
        let base = std::env::temp_dir().join("pango-log-missing-dir");
        let messy = base.join("a").join("..").join(".").join("rec.pango");
        let normalized = normalize_path(&messy)?;
        ensure!(normalized.ends_with("pango-log-missing-dir/rec.pango"), "{}", normalized.display());
        Ok(())
    }

    #[test]
    fn choose_picks_shared_only_when_ordered() -> Result<()> {
        ensure!(Arc::ptr_eq(&PlaybackSession::choose(true), &PlaybackSession::shared()));
        ensure!(!Arc::ptr_eq(&PlaybackSession::choose(false), &PlaybackSession::shared()));

        let ordered = PlaybackSession::choose_from_params(&Params::from_uri_query("OrderedPlayback=1"))?;
        ensure!(Arc::ptr_eq(&ordered, &PlaybackSession::shared()));
        let isolated = PlaybackSession::choose_from_params(&Params::new())?;
        ensure!(!Arc::ptr_eq(&isolated, &PlaybackSession::shared()));
        Ok(())
    }

    #[test]
    fn missing_files_are_not_cached() {
        let session = PlaybackSession::new();
        let result = session.open(std::env::temp_dir().join("pango-log-does-not-exist.pango"));
        assert!(matches!(result, Err(PacketStreamError::File { .. })));
        assert!(session.is_empty());
    }
}
