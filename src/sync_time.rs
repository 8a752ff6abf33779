//! Shared playback clock.
//!
//! A [`SyncTime`] maps wall-clock time onto a virtual timeline by a fixed
//! offset. Players that pace themselves against the same `SyncTime` stay in
//! step, even when they read different files. Times are microseconds since
//! the Unix epoch on both timelines.
//!
//! The event queue lets several players take turns in timestamp order: each
//! queues the time of its next frame and waits until that time is the
//! earliest one queued. [`SyncTime::stop`] and [`SyncTime::seek`] wake
//! every waiter with
//! [`SeekInterrupted`](PacketStreamError::SeekInterrupted), since queued
//! times mean nothing after a jump.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{PacketStreamError, Result};

#[derive(Debug, Default)]
struct TimeQueue {
    /// Sorted descending; the earliest event is last.
    events: Vec<i64>,
    seeking: bool,
    /// Bumped by every stop and seek so waiters notice even if the flag is already reset.
    epoch: u64,
}

impl TimeQueue {
    fn insert(&mut self, time_us: i64) {
        let at = self.events.partition_point(|&e| e >= time_us);
        self.events.insert(at, time_us);
    }

    fn earliest(&self) -> Option<i64> {
        self.events.last().copied()
    }
}

/// Virtual playback clock with an ordered event queue.
#[derive(Debug, Default)]
pub struct SyncTime {
    offset_us: AtomicI64,
    queue: Mutex<TimeQueue>,
    queue_changed: Condvar,
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn wall_clock_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

impl SyncTime {
    /// A clock running `offset_us` ahead of the wall clock.
    pub fn new(offset_us: i64) -> Self {
        Self { offset_us: AtomicI64::new(offset_us), ..Default::default() }
    }

    pub fn offset_us(&self) -> i64 {
        self.offset_us.load(Ordering::Acquire)
    }

    pub fn set_offset(&self, offset_us: i64) {
        self.offset_us.store(offset_us, Ordering::Release);
    }

    /// Make the virtual clock read `virtual_now_us` right now.
    pub fn set_clock(&self, virtual_now_us: i64) {
        self.set_offset(virtual_now_us - wall_clock_us());
    }

    pub fn time_now(&self) -> i64 {
        self.to_virtual(wall_clock_us())
    }

    pub fn to_virtual(&self, real_us: i64) -> i64 {
        real_us + self.offset_us()
    }

    pub fn to_real(&self, virtual_us: i64) -> i64 {
        virtual_us - self.offset_us()
    }

    /// Wall-clock time left until the virtual clock reaches `virtual_us`.
    pub fn delay_until(&self, virtual_us: i64) -> Duration {
        let remaining = self.to_real(virtual_us) - wall_clock_us();
        Duration::from_micros(u64::try_from(remaining).unwrap_or(0))
    }

    /// Block the calling thread until the virtual clock reaches `virtual_us`.
    pub fn wait_until(&self, virtual_us: i64) {
        let delay = self.delay_until(virtual_us);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    /// Align the virtual clock with a stream position, e.g. after a seek.
    pub fn resync_to(&self, stream_time_us: i64) {
        self.set_clock(stream_time_us);
        debug!("Playback clock resynced to {}us", stream_time_us);
    }

    /// Clear the event queue and the offset. Only valid while nobody waits on the queue.
    pub fn reset(&self) {
        let mut queue = self.queue.lock();
        queue.seeking = false;
        queue.events.clear();
        self.set_offset(0);
    }

    /// Add an event to the queue.
    pub fn queue_event(&self, time_us: i64) -> Result<()> {
        self.wait_dequeue_and_queue_event(None, Some(time_us))
    }

    /// Remove a queued event without waiting for its turn.
    pub fn dequeue_event(&self, time_us: i64) -> Result<()> {
        let mut queue = self.queue.lock();
        let at = queue
            .events
            .iter()
            .position(|&e| e == time_us)
            .ok_or(PacketStreamError::EventNotQueued { time_us })?;
        queue.events.remove(at);
        self.queue_changed.notify_all();
        Ok(())
    }

    /// Wait until `event` is the earliest queued event, dequeue it, then
    /// queue `new_event` while still holding the queue.
    pub fn wait_dequeue_and_queue_event(&self, event: Option<i64>, new_event: Option<i64>) -> Result<()> {
        let mut queue = self.queue.lock();

        if let Some(event) = event {
            if !queue.events.contains(&event) {
                return Err(PacketStreamError::EventNotQueued { time_us: event });
            }
            let epoch = queue.epoch;
            loop {
                if queue.seeking || queue.epoch != epoch || !queue.events.contains(&event) {
                    return Err(PacketStreamError::SeekInterrupted);
                }
                if queue.earliest() == Some(event) {
                    break;
                }
                self.queue_changed.wait(&mut queue);
            }
            queue.events.pop();
            trace!("Dequeued playback event {}us", event);
        }

        if let Some(new_event) = new_event {
            queue.insert(new_event);
            if queue.earliest() == Some(new_event) {
                // Still first in line; nobody else needs waking.
                return Ok(());
            }
        }

        self.queue_changed.notify_all();
        Ok(())
    }

    pub fn notify_all(&self) {
        self.queue_changed.notify_all();
    }

    /// Interrupt every waiter; queued times become meaningless.
    pub fn stop(&self) {
        {
            let mut queue = self.queue.lock();
            queue.seeking = true;
            queue.epoch += 1;
        }
        self.queue_changed.notify_all();
    }

    pub fn start(&self) {
        self.queue.lock().seeking = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.queue.lock().seeking
    }

    /// Interrupt waiters, drop queued events and jump the virtual clock to `virtual_now_us`.
    pub fn seek(&self, virtual_now_us: i64) {
        {
            let mut queue = self.queue.lock();
            queue.epoch += 1;
            queue.events.clear();
            queue.seeking = false;
            self.set_clock(virtual_now_us);
        }
        self.queue_changed.notify_all();
        debug!("Playback clock seeked to {}us", virtual_now_us);
    }
}

/// A queued event that is dequeued again when dropped.
#[derive(Debug)]
pub struct SyncTimeEventPromise<'a> {
    sync: &'a SyncTime,
    time_us: Option<i64>,
}

impl<'a> SyncTimeEventPromise<'a> {
    /// Queue `time_us` (if any) on `sync`.
    pub fn new(sync: &'a SyncTime, time_us: Option<i64>) -> Result<Self> {
        if let Some(time_us) = time_us {
            sync.queue_event(time_us)?;
        }
        Ok(Self { sync, time_us })
    }

    pub fn time_us(&self) -> Option<i64> {
        self.time_us
    }

    /// Withdraw the event without waiting for it.
    pub fn cancel(&mut self) {
        if let Some(time_us) = self.time_us.take() {
            // Already gone after a seek cleared the queue.
            let _ = self.sync.dequeue_event(time_us);
        }
    }

    /// Wait for this event's turn, then queue `new_time_us` in its place.
    pub fn wait_and_renew(&mut self, new_time_us: Option<i64>) -> Result<()> {
        let current = self.time_us.take();
        self.sync.wait_dequeue_and_queue_event(current, new_time_us)?;
        self.time_us = new_time_us;
        Ok(())
    }
}

impl Drop for SyncTimeEventPromise<'_> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, ensure};
    use std::sync::Arc;
    use std::sync::mpsc;

    #[test]
    fn clock_offsets() -> Result<()> {
        let sync = SyncTime::new(0);
        sync.set_clock(1_000);
        let now = sync.time_now();
        ensure!((1_000..1_000 + 1_000_000).contains(&now), "virtual now was {}", now);
        ensure!(sync.to_real(sync.to_virtual(42)) == 42);
        ensure!(sync.delay_until(0).is_zero());
        ensure!(sync.delay_until(now + 5_000_000) > Duration::from_secs(4));

        sync.reset();
        ensure!(sync.offset_us() == 0);
        Ok(())
    }

    #[test]
    fn queue_keeps_earliest_last() {
        let mut queue = TimeQueue::default();
        for t in [30, 10, 20, 10] {
            queue.insert(t);
        }
        assert_eq!(queue.events, vec![30, 20, 10, 10]);
        assert_eq!(queue.earliest(), Some(10));
    }

    #[test]
    fn events_are_served_in_time_order() -> Result<()> {
        let sync = Arc::new(SyncTime::default());
        sync.queue_event(10)?;
        sync.queue_event(20)?;

        let (tx, rx) = mpsc::channel();
        let late = {
            let sync = Arc::clone(&sync);
            let tx = tx.clone();
            std::thread::spawn(move || {
                let result = sync.wait_dequeue_and_queue_event(Some(20), None);
                tx.send(20).ok();
                result
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        ensure!(rx.try_recv().is_err(), "event 20 must wait for event 10");

        sync.wait_dequeue_and_queue_event(Some(10), None)?;
        tx.send(10).ok();
        late.join().map_err(|_| anyhow::anyhow!("waiter panicked"))??;

        let order: Vec<i32> = rx.try_iter().collect();
        ensure!(order.len() == 2 && order.contains(&20));
        ensure!(sync.queue.lock().events.is_empty());
        Ok(())
    }

    #[test]
    fn stop_interrupts_waiters() -> Result<()> {
        let sync = Arc::new(SyncTime::default());
        sync.queue_event(5)?;
        sync.queue_event(50)?;

        let waiter = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || sync.wait_dequeue_and_queue_event(Some(50), None))
        };
        std::thread::sleep(Duration::from_millis(20));
        sync.stop();

        let result = waiter.join().map_err(|_| anyhow::anyhow!("waiter panicked"))?;
        ensure!(matches!(result, Err(PacketStreamError::SeekInterrupted)));
        ensure!(sync.is_stopped());

        sync.seek(1_000);
        ensure!(!sync.is_stopped());
        ensure!(sync.queue.lock().events.is_empty());
        Ok(())
    }

    #[test]
    fn seek_interrupts_every_waiter() -> Result<()> {
        for round in 0..30 {
            let sync = Arc::new(SyncTime::default());
            sync.queue_event(5)?;
            sync.queue_event(50)?;

            let (tx, rx) = mpsc::channel();
            let waiter = {
                let sync = Arc::clone(&sync);
                std::thread::spawn(move || {
                    tx.send(sync.wait_dequeue_and_queue_event(Some(50), None)).ok();
                })
            };
            std::thread::sleep(Duration::from_millis(10));
            sync.seek(1_000);

            let result = rx
                .recv_timeout(Duration::from_millis(500))
                .map_err(|_| anyhow::anyhow!("waiter still parked after seek in round {}", round))?;
            waiter.join().map_err(|_| anyhow::anyhow!("waiter panicked"))?;
            // A waiter that starts after the seek finds its event already gone.
            ensure!(
                matches!(result, Err(PacketStreamError::SeekInterrupted | PacketStreamError::EventNotQueued { .. })),
                "round {}: {:?}",
                round,
                result
            );
            ensure!(!sync.is_stopped());
            ensure!(sync.queue.lock().events.is_empty());
        }
        Ok(())
    }

    #[test]
    fn unknown_events_are_errors() {
        let sync = SyncTime::default();
        assert!(matches!(sync.dequeue_event(3), Err(PacketStreamError::EventNotQueued { time_us: 3 })));
        assert!(matches!(
            sync.wait_dequeue_and_queue_event(Some(3), None),
            Err(PacketStreamError::EventNotQueued { .. })
        ));
    }

    #[test]
    fn promise_dequeues_on_drop() -> Result<()> {
        let sync = SyncTime::default();
        {
            let mut promise = SyncTimeEventPromise::new(&sync, Some(7))?;
            ensure!(sync.queue.lock().events == vec![7]);
            promise.wait_and_renew(Some(9))?;
            ensure!(promise.time_us() == Some(9));
            ensure!(sync.queue.lock().events == vec![9]);
        }
        ensure!(sync.queue.lock().events.is_empty());
        Ok(())
    }
}
