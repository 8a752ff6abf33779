//! Stream throttling utilities

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Throttle the stream to emit at most once per interval
    ///
    /// Uses "latest-wins" semantics - if multiple items arrive
    /// during an interval, only the latest is emitted.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that throttles emission rate
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        // A tick has elapsed and nothing was emitted for it yet
        armed: bool,
        done: bool,
    }
}

impl<S: Stream> Throttle<S> {
    /// Create a new throttled stream
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Don't burst after a slow consumer
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, armed: false, done: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(this.pending.take());
        }

        if !*this.armed {
            ready!(this.interval.poll_tick(cx));
            *this.armed = true;
        }

        // Drain all available items, keeping only the latest
        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    *this.pending = Some(item);
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(this.pending.take());
                }
                Poll::Pending => {
                    return match this.pending.take() {
                        Some(item) => {
                            *this.armed = false;
                            Poll::Ready(Some(item))
                        }
                        // Stay armed; the inner stream wakes us
                        None => Poll::Pending,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tokio_stream::wrappers::WatchStream;

    #[tokio::test]
    async fn finite_stream_ends_with_latest_item() {
        let items: Vec<u32> = futures::stream::iter(1..=5).throttle(Duration::from_millis(5)).collect().await;
        assert_eq!(items.last(), Some(&5));
        assert!(items.len() <= 5);
    }

    #[tokio::test]
    async fn waits_for_late_items_instead_of_ending() {
        let (tx, rx) = watch::channel(None::<Arc<u32>>);
        let mut throttled = WatchStream::from_changes(rx)
            .filter_map(|v| async move { v })
            .boxed()
            .throttle(Duration::from_millis(10));

        let producer = tokio::spawn(async move {
            for i in 0..3u32 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                tx.send(Some(Arc::new(i))).ok();
            }
        });

        let mut seen = Vec::new();
        while let Some(value) = throttled.next().await {
            seen.push(*value);
        }
        producer.await.ok();
        assert_eq!(seen.last(), Some(&2));
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", seen);
    }
}
