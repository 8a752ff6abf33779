//! Replay provider for `.pango` recordings

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::log::{PacketStreamReader, PacketStreamSource, SourceId};
use crate::provider::Provider;
use crate::session::PlaybackSession;
use crate::sync_time::SyncTime;
use crate::types::PacketRecord;
use crate::{PacketStreamError, Result};

/// Replays one source of a shared reader
///
/// Without a clock packets are delivered as fast as they can be read. With
/// one, each packet is held back until the clock reaches its capture time.
pub struct ReplayProvider {
    /// Shared reader; other providers may pull other sources from it
    reader: Arc<PacketStreamReader>,

    /// Snapshot of the replayed source
    source: PacketStreamSource,

    /// Playback clock used for pacing
    clock: Option<Arc<SyncTime>>,

    /// Whether this provider sets the clock from its first packet
    leader: bool,

    /// Whether a packet has been delivered since open or the last seek
    started: bool,

    /// Nominal rate derived from the index
    packet_rate: Option<f64>,
}

impl ReplayProvider {
    /// Replay `src` from `reader` without pacing
    pub fn new(reader: Arc<PacketStreamReader>, src: SourceId) -> Result<Self> {
        let source = reader.source(src).ok_or_else(|| PacketStreamError::InvalidSource {
            id: src,
            known: reader.sources().len(),
        })?;
        let packet_rate = estimate_rate(&source);

        info!(
            "Replaying source {} ({}, {} frames, {:?}Hz)",
            src,
            source.driver,
            source.index.len(),
            packet_rate
        );

        Ok(Self { reader, source, clock: None, leader: false, started: false, packet_rate })
    }

    /// Open `path` through `session` and pace against the session clock
    ///
    /// The provider leads the clock: its first packet sets the clock's
    /// virtual time.
    pub fn from_session<P: AsRef<Path>>(session: &PlaybackSession, path: P, src: SourceId) -> Result<Self> {
        let reader = session.open(path)?;
        Ok(Self::new(reader, src)?.with_clock(session.time(), true))
    }

    /// Pace against `clock`. A `leader` resyncs the clock on its first packet.
    pub fn with_clock(mut self, clock: Arc<SyncTime>, leader: bool) -> Self {
        self.clock = Some(clock);
        self.leader = leader;
        self
    }

    /// Seek to a specific frame; a leading provider resyncs the clock on the next packet
    pub fn seek_to_frame(&mut self, frame: usize) -> Result<()> {
        self.reader.seek(self.source.id, frame)?;
        self.started = false;
        debug!("Seeking source {} to frame {}", self.source.id, frame);
        Ok(())
    }

    /// Total duration of the source in microseconds, from the index
    pub fn duration_us(&self) -> Option<i64> {
        let first = self.source.index.first()?;
        let last = self.source.index.last()?;
        Some(last.capture_time - first.capture_time)
    }

    pub fn reader(&self) -> &Arc<PacketStreamReader> {
        &self.reader
    }

    async fn read_next(&self) -> Result<Option<PacketRecord>> {
        let reader = Arc::clone(&self.reader);
        let src = self.source.id;
        tokio::task::spawn_blocking(move || {
            let next = reader.next_frame_from(src)?;
            match next {
                Some(mut packet) => PacketRecord::from_packet(&mut packet).map(Some),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| PacketStreamError::Playback { details: e.to_string() })?
    }
}

fn estimate_rate(source: &PacketStreamSource) -> Option<f64> {
    let first = source.index.first()?;
    let last = source.index.last()?;
    let span_us = last.capture_time - first.capture_time;
    if source.index.len() < 2 || span_us <= 0 {
        return None;
    }
    Some((source.index.len() - 1) as f64 * 1_000_000.0 / span_us as f64)
}

#[async_trait::async_trait]
impl Provider for ReplayProvider {
    async fn next_packet(&mut self) -> Result<Option<PacketRecord>> {
        let Some(record) = self.read_next().await? else {
            debug!("Reached end of source {}", self.source.id);
            return Ok(None);
        };

        if let Some(clock) = &self.clock {
            if !self.started && self.leader {
                clock.resync_to(record.time_us);
            }
            let delay = clock.delay_until(record.time_us);
            if !delay.is_zero() {
                trace!("Holding packet {} for {:?}", record.sequence_num, delay);
                tokio::time::sleep(delay).await;
            }
        }
        self.started = true;

        Ok(Some(record))
    }

    fn source(&self) -> &PacketStreamSource {
        &self.source
    }

    fn packet_rate(&self) -> Option<f64> {
        self.packet_rate
    }
}
