// ── Reactive subscription handles ──
//
// `PathStream` follows one path slot (replay-last-value semantics over a
// `watch` channel). `DatasetStream` yields a series' buffer once, then its
// live samples.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::model::{DatasetEvent, DatasetSample, PathUpdate};

// ── PathStream ───────────────────────────────────────────────────────

/// A subscription to one `(consumer, path, source)` slot.
pub struct PathStream {
    current: PathUpdate,
    receiver: watch::Receiver<PathUpdate>,
}

impl PathStream {
    pub(crate) fn new(mut receiver: watch::Receiver<PathUpdate>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// Value captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> &PathUpdate {
        &self.current
    }

    /// Latest value, which may be newer than `current()`.
    pub fn latest(&self) -> PathUpdate {
        self.receiver.borrow().clone()
    }

    /// Wait for the next update. `None` once the slot was dropped by
    /// `unsubscribe`.
    pub async fn changed(&mut self) -> Option<PathUpdate> {
        self.receiver.changed().await.ok()?;
        let update = self.receiver.borrow_and_update().clone();
        self.current = update.clone();
        Some(update)
    }

    /// Convert into a `Stream`. The first item is the latest value.
    pub fn into_stream(self) -> PathWatchStream {
        PathWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by the slot's `watch::Receiver`.
pub struct PathWatchStream {
    inner: WatchStream<PathUpdate>,
}

impl Stream for PathWatchStream {
    type Item = PathUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── DatasetStream ────────────────────────────────────────────────────

/// Batch-then-live subscription to one series.
///
/// The first item is always [`DatasetEvent::Batch`] with the buffer as it
/// was when the subscription was taken; every later item is a
/// [`DatasetEvent::Live`] sample pushed after that snapshot.
pub struct DatasetStream {
    batch: Option<Vec<DatasetSample>>,
    live: broadcast::Receiver<DatasetSample>,
}

impl DatasetStream {
    pub(crate) fn new(batch: Vec<DatasetSample>, live: broadcast::Receiver<DatasetSample>) -> Self {
        Self {
            batch: Some(batch),
            live,
        }
    }

    /// Next event. `None` once the series has been removed or replaced.
    pub async fn next(&mut self) -> Option<DatasetEvent> {
        if let Some(batch) = self.batch.take() {
            return Some(DatasetEvent::Batch(batch));
        }
        loop {
            match self.live.recv().await {
                Ok(sample) => return Some(DatasetEvent::Live(sample)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "dataset subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream` of events.
    pub fn into_stream(mut self) -> impl Stream<Item = DatasetEvent> + Send {
        async_stream::stream! {
            while let Some(event) = self.next().await {
                yield event;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn path_stream_replays_and_follows() {
        let (tx, rx) = watch::channel(PathUpdate {
            value: Some(json!(1.0)),
            ..PathUpdate::default()
        });
        let mut stream = PathStream::new(rx);
        assert_eq!(stream.current().as_f64(), Some(1.0));

        tx.send_replace(PathUpdate {
            value: Some(json!(2.0)),
            ..PathUpdate::default()
        });
        assert_eq!(stream.changed().await.unwrap().as_f64(), Some(2.0));
        assert_eq!(stream.current().as_f64(), Some(2.0));

        drop(tx);
        assert!(stream.changed().await.is_none());
    }

    #[tokio::test]
    async fn dataset_stream_emits_batch_first() {
        let (tx, rx) = broadcast::channel(8);
        let sample = |value| DatasetSample {
            value,
            ..DatasetSample::default()
        };
        tx.send(sample(2.0)).unwrap();
        let stream = DatasetStream::new(vec![sample(1.0)], rx);
        drop(tx);

        let events: Vec<DatasetEvent> = stream.into_stream().collect().await;
        assert_eq!(
            events,
            vec![
                DatasetEvent::Batch(vec![sample(1.0)]),
                DatasetEvent::Live(sample(2.0)),
            ]
        );
    }

    #[test]
    fn dataset_stream_waits_for_live_samples() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = DatasetStream::new(Vec::new(), rx);

        let mut first = tokio_test::task::spawn(stream.next());
        let batch = tokio_test::assert_ready!(first.poll());
        assert_eq!(batch, Some(DatasetEvent::Batch(Vec::new())));
        drop(first);

        let mut next = tokio_test::task::spawn(stream.next());
        tokio_test::assert_pending!(next.poll());

        let sample = DatasetSample {
            value: 4.5,
            ..DatasetSample::default()
        };
        tx.send(sample.clone()).unwrap();
        assert!(next.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(next.poll()),
            Some(DatasetEvent::Live(sample))
        );
    }
}
