//! Per-channel fan-out
//!
//! One broadcaster multiplexes the transcoder's byte stream to every
//! subscribed session. Each subscriber gets a bounded view of the stream;
//! a subscriber that falls behind loses its oldest chunks (whole chunks at
//! a time) and rejoins at the live edge, so it glitches instead of lagging
//! forever.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::RecvError;

pub struct Broadcaster {
    tx: broadcast::Sender<Bytes>,
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Broadcaster {
    /// `capacity` is measured in whole chunks
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(2));
        Self {
            tx,
            chunks_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Subscribe at the live edge; history is never replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    /// Fan a chunk out to all subscribers. Returns the subscriber count at
    /// send time; zero means the chunk went nowhere.
    pub fn send(&self, chunk: Bytes) -> usize {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.tx.send(chunk).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_chunks_in_order() {
        let broadcaster = Broadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        for i in 0..5u8 {
            broadcaster.send(Bytes::from(vec![i; 4]));
        }

        for i in 0..5u8 {
            let chunk = rx.recv().await.unwrap();
            assert_eq!(chunk[0], i);
        }
    }

    #[tokio::test]
    async fn test_send_without_subscribers_returns_zero() {
        let broadcaster = Broadcaster::new(8);
        assert_eq!(broadcaster.send(Bytes::from_static(b"x")), 0);
        assert_eq!(broadcaster.chunks_sent(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_drops_oldest_and_recovers() {
        let broadcaster = Broadcaster::new(4);
        let mut rx = broadcaster.subscribe();

        // Overflow the subscriber's view
        for i in 0..10u8 {
            broadcaster.send(Bytes::from(vec![i; 4]));
        }

        // First recv reports how many chunks were dropped
        match rx.recv().await {
            Err(RecvError::Lagged(dropped)) => assert_eq!(dropped, 6),
            other => panic!("expected lag, got {:?}", other),
        }

        // Recovery resumes at the oldest retained chunk, order preserved
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk[0], 6);
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk[0], 7);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_fast_one() {
        let broadcaster = Broadcaster::new(4);
        let mut fast = broadcaster.subscribe();
        let mut slow = broadcaster.subscribe();

        for i in 0..10u8 {
            broadcaster.send(Bytes::from(vec![i; 4]));
            // Fast consumer keeps up chunk by chunk
            assert_eq!(fast.recv().await.unwrap()[0], i);
        }

        // Slow consumer lagged independently
        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn test_subscriber_count_tracks_receivers() {
        let broadcaster = Broadcaster::new(4);
        assert_eq!(broadcaster.subscriber_count(), 0);
        let rx1 = broadcaster.subscribe();
        let rx2 = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);
        drop(rx1);
        drop(rx2);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
