// =============================================================================
// Per-session outbound queue - fixed-capacity ring, drop-oldest on overflow
// =============================================================================
//
// Delivery to each session is best-effort and independent: the dispatcher
// pushes without ever blocking, and a slow session sheds its own oldest
// messages while other sessions' queues are untouched. The cap is a
// correctness property (bounded memory), not a tuning knob only.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::protocol::ServerMessage;

pub struct OutboundQueue {
    session_id: String,
    capacity: usize,
    ring: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            session_id: session_id.into(),
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a message for delivery. When the ring is full the oldest
    /// queued message is evicted; the push itself never blocks. Returns
    /// whether an eviction happened.
    pub fn push(&self, msg: ServerMessage) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let evicted = {
            let mut ring = self.ring.lock();
            let evicted = if ring.len() >= self.capacity {
                ring.pop_front();
                true
            } else {
                false
            };
            ring.push_back(msg);
            evicted
        };

        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Wait for the next queued message. Returns `None` once the queue is
    /// closed and drained. Single consumer: the session's delivery pump.
    pub async fn pop(&self) -> Option<ServerMessage> {
        loop {
            if let Some(msg) = self.ring.lock().pop_front() {
                return Some(msg);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Mark the queue closed and wake the pump so it can drain and stop.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Messages evicted by the drop-oldest policy since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pong(timestamp: i64) -> ServerMessage {
        ServerMessage::Pong { timestamp }
    }

    #[test]
    fn push_past_capacity_evicts_oldest() {
        let q = OutboundQueue::new("s1", 3);
        assert!(!q.push(pong(1)));
        assert!(!q.push(pong(2)));
        assert!(!q.push(pong(3)));
        // Queue full: the 4th push must evict message 1, not block.
        assert!(q.push(pong(4)));

        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped_count(), 1);
    }

    #[tokio::test]
    async fn pop_preserves_fifo_order_after_eviction() {
        let q = OutboundQueue::new("s1", 2);
        q.push(pong(1));
        q.push(pong(2));
        q.push(pong(3));

        assert_eq!(q.pop().await, Some(pong(2)));
        assert_eq!(q.pop().await, Some(pong(3)));
    }

    #[test]
    fn eviction_is_isolated_per_session() {
        let a = OutboundQueue::new("a", 2);
        let b = OutboundQueue::new("b", 2);
        a.push(pong(1));
        a.push(pong(2));
        b.push(pong(10));

        a.push(pong(3));

        assert_eq!(a.dropped_count(), 1);
        assert_eq!(b.dropped_count(), 0);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let q = OutboundQueue::new("s1", 4);
        q.push(pong(1));
        q.close();

        assert_eq!(q.pop().await, Some(pong(1)));
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let q = std::sync::Arc::new(OutboundQueue::new("s1", 4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.push(pong(7));

        let got = waiter.await.unwrap();
        assert_eq!(got, Some(pong(7)));
    }

    #[test]
    fn push_after_close_is_ignored() {
        let q = OutboundQueue::new("s1", 4);
        q.close();
        q.push(pong(1));
        assert!(q.is_empty());
    }
}
