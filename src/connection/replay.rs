//! Replay connection for `.pango` recordings

use futures::{Stream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::driver::Driver;
use crate::log::{PacketStreamSource, SourceId};
use crate::provider::Provider;
use crate::providers::replay::ReplayProvider;
use crate::session::PlaybackSession;
use crate::stream::ThrottleExt;
use crate::types::{PacketRecord, UpdateRate};

/// Replay connection for one source of a recording
///
/// Packets are replayed in the background, paced by the session clock, and
/// fanned out to any number of subscribers.
pub struct ReplayConnection {
    /// Packet watch receiver
    packets: watch::Receiver<Option<Arc<PacketRecord>>>,

    /// Descriptor of the replayed source
    source: PacketStreamSource,

    /// Nominal source rate
    source_hz: Option<f64>,

    /// Cancellation token for stopping the replay task
    cancel: CancellationToken,
}

impl ReplayConnection {
    /// Open `path` through `session` and start replaying source `src`.
    ///
    /// Waits for the first packet to be available before returning so that
    /// subscriptions start with data.
    pub async fn open<P: AsRef<Path>>(session: &PlaybackSession, path: P, src: SourceId) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening recording for replay: {} (source {})", path.display(), src);

        let provider = ReplayProvider::from_session(session, path, src)?;
        Ok(Self::from_provider(provider).await)
    }

    /// Start replaying from an already configured provider.
    pub async fn from_provider<P: Provider>(provider: P) -> Self {
        let source = provider.source().clone();
        let source_hz = provider.packet_rate();

        let channels = Driver::spawn(provider);

        // Wait for first packet to be available
        let mut packet_rx = channels.packets.clone();
        let timeout = std::time::Duration::from_secs(5);
        let wait_result = tokio::time::timeout(timeout, async {
            loop {
                if packet_rx.borrow_and_update().is_some() {
                    break;
                }
                if packet_rx.changed().await.is_err() {
                    // Replay ended before producing anything
                    break;
                }
            }
        })
        .await;

        if wait_result.is_err() {
            warn!("Timeout waiting for first packet of source {}", source.id);
        }

        info!("Replay connection opened for source {} ({:?}Hz)", source.id, source_hz);

        Self { packets: channels.packets, source, source_hz, cancel: channels.cancel }
    }

    /// Subscribe to replayed packets
    ///
    /// The stream starts with the most recent packet and ends when the
    /// recording is exhausted. Slow subscribers skip packets rather than
    /// buffer them.
    pub fn subscribe(&self, rate: UpdateRate) -> impl Stream<Item = Arc<PacketRecord>> + 'static {
        let packets = WatchStream::new(self.packets.clone()).filter_map(|opt| async move { opt });

        match rate.throttle_interval(self.source_hz) {
            None => packets.boxed(),
            Some(interval) => packets.throttle(interval).boxed(),
        }
    }

    /// Most recently replayed packet, if any
    pub fn latest(&self) -> Option<Arc<PacketRecord>> {
        self.packets.borrow().clone()
    }

    /// Get the replayed source descriptor
    pub fn source(&self) -> &PacketStreamSource {
        &self.source
    }

    /// Nominal packet rate of the source, when the index allows estimating it
    pub fn source_hz(&self) -> Option<f64> {
        self.source_hz
    }

    /// Stop the replay task. Subscriber streams end shortly after.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ReplayConnection {
    fn drop(&mut self) {
        debug!("Dropping replay connection for source {}", self.source.id);
        self.cancel.cancel();
    }
}
