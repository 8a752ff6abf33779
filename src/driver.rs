//! Driver spawns and manages the replay task

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::provider::Provider;
use super::types::PacketRecord;

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Receiver for replayed packets; closed when the provider is exhausted
    pub packets: watch::Receiver<Option<Arc<PacketRecord>>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the packet reader task
///
/// The task owns the provider and publishes every packet on a watch
/// channel. Watch semantics mean slow subscribers see the latest packet
/// rather than a backlog.
pub struct Driver;

impl Driver {
    /// Spawn the reader task for the given provider
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<P>(provider: P) -> DriverChannels
    where
        P: Provider,
    {
        let (packet_tx, packet_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            Self::packet_reader_task(provider, packet_tx, cancel_task).await;
        });

        DriverChannels { packets: packet_rx, cancel }
    }

    /// Packet reader task - pulls packets until the provider ends or fails for good
    async fn packet_reader_task<P>(
        mut provider: P,
        packet_tx: watch::Sender<Option<Arc<PacketRecord>>>,
        cancel: CancellationToken,
    ) where
        P: Provider,
    {
        let src = provider.source().id;
        info!("Packet reader task started for source {}", src);
        let mut packet_count = 0u64;
        let mut error_count = 0u32;
        const MAX_ERRORS: u32 = 10;

        loop {
            if cancel.is_cancelled() {
                info!("Packet reader cancelled");
                break;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Packet reader cancelled during read");
                    break;
                }
                result = provider.next_packet() => result,
            };

            match result {
                Ok(Some(record)) => {
                    packet_count += 1;
                    error_count = 0;
                    trace!("Packet {}: seq={}, time={}us", packet_count, record.sequence_num, record.time_us);

                    if packet_tx.send(Some(Arc::new(record))).is_err() {
                        debug!("Packet receivers dropped, shutting down");
                        break;
                    }
                }
                Ok(None) => {
                    // Dropping the sender ends subscriber streams once they
                    // have seen the last packet.
                    info!("Provider stream ended after {} packets", packet_count);
                    break;
                }
                Err(e) if !e.is_recoverable() => {
                    error!("Provider failed: {}", e);
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    error!("Provider error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many provider errors, shutting down");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = std::time::Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("Packet reader task ended (processed {} packets)", packet_count);
    }
}
