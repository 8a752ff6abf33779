//! Paced replay through the async connection layer

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, ensure};
use futures::StreamExt;
use pango_log::provider::Provider;
use pango_log::{PlaybackSession, ReplayConnection, ReplayProvider, SyncTime, UpdateRate};

use common::{evenly_spaced, payload, recording, write_file};

#[tokio::test]
async fn native_subscription_sees_the_final_packet() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "paced.pango", &recording(&evenly_spaced(5, 10_000), true)?)?;

    let session = PlaybackSession::new();
    let started = Instant::now();
    let connection = ReplayConnection::open(&session, &path, 0).await?;
    ensure!(connection.source_hz().is_some_and(|hz| (hz - 100.0).abs() < 1e-6));

    let packets: Vec<_> = connection.subscribe(UpdateRate::Native).collect().await;
    let last = packets.last().context("no packets")?;
    ensure!(last.sequence_num == 4);
    ensure!(*last.payload == payload(4));
    ensure!(started.elapsed() >= Duration::from_millis(35), "replay was not paced: {:?}", started.elapsed());
    Ok(())
}

#[tokio::test]
async fn throttled_subscription_skips_packets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "dense.pango", &recording(&evenly_spaced(40, 5_000), true)?)?;

    let session = PlaybackSession::new();
    let connection = ReplayConnection::open(&session, &path, 0).await?;
    let packets: Vec<_> = connection.subscribe(UpdateRate::Max(20)).collect().await;

    ensure!(!packets.is_empty());
    ensure!(packets.len() < 40, "throttle let {} packets through", packets.len());
    ensure!(packets.windows(2).all(|w| w[0].sequence_num < w[1].sequence_num));
    Ok(())
}

#[tokio::test]
async fn seek_then_replay_resyncs_the_clock() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // One packet per second: without a resync after seeking the provider would wait seconds.
    let path = write_file(dir.path(), "slow.pango", &recording(&evenly_spaced(6, 1_000_000), true)?)?;

    let session = PlaybackSession::new();
    let clock: Arc<SyncTime> = session.time();
    let mut provider = ReplayProvider::from_session(&session, &path, 0)?;
    provider.seek_to_frame(5)?;

    let started = Instant::now();
    let record = provider.next_packet().await?.context("packet after seek")?;
    ensure!(record.sequence_num == 5 && record.time_us == 5_000_000);
    ensure!(started.elapsed() < Duration::from_millis(500));
    ensure!((clock.time_now() - 5_000_000).abs() < 500_000);
    ensure!(provider.next_packet().await?.is_none());
    Ok(())
}
