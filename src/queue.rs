//! Bounded, ordered outbound message queue.
//!
//! Application payloads that cannot be sent right now (connection absent or
//! not yet stable) wait here in strict FIFO order. The queue favors recency
//! over completeness: when full, the oldest entries are dropped — this is a
//! best-effort live channel, not a durable log.

use serde_json::Value;
use std::collections::VecDeque;
use std::time::Instant;

/// A payload awaiting transmission.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Opaque application payload.
    pub payload: Value,
    /// When the payload was accepted.
    pub enqueued_at: Instant,
    /// Queue-assigned sequence number, unique per queue.
    pub(crate) seq: u64,
}

/// Bounded FIFO buffer of not-yet-sent payloads.
///
/// A message is removed only after a successful send call; on the first
/// send failure in a drain pass the caller stops, preserving order and
/// avoiding a busy loop against a dead connection.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
    max_len: usize,
    next_seq: u64,
}

impl OutboundQueue {
    pub fn new(max_len: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_len: max_len.max(1),
            next_seq: 0,
        }
    }

    /// Append a payload, dropping from the front if the queue is full.
    ///
    /// Returns the number of messages dropped so the caller can log the
    /// overflow.
    pub fn enqueue(&mut self, payload: Value) -> usize {
        let mut dropped = 0;
        while self.items.len() >= self.max_len {
            self.items.pop_front();
            dropped += 1;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(QueuedMessage {
            payload,
            enqueued_at: Instant::now(),
            seq,
        });
        dropped
    }

    /// The next payload to send, without removing it.
    pub fn front(&self) -> Option<&QueuedMessage> {
        self.items.front()
    }

    /// Remove the head after a successful send.
    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    /// Remove the head only if it is still the message with the given
    /// sequence number.
    ///
    /// An overflow during an in-flight send may have already evicted the
    /// head; popping blindly would then discard a message that was never
    /// sent. Returns whether anything was removed.
    pub(crate) fn pop_front_if(&mut self, seq: u64) -> bool {
        if self.items.front().map(|m| m.seq) == Some(seq) {
            self.items.pop_front();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preserves_fifo_order() {
        let mut q = OutboundQueue::new(8);
        for i in 0..5 {
            q.enqueue(json!({ "n": i }));
        }
        for i in 0..5 {
            let msg = q.pop_front().unwrap();
            assert_eq!(msg.payload["n"], i);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn overflow_drops_oldest_and_reports() {
        let mut q = OutboundQueue::new(3);
        let mut dropped = 0;
        for i in 0..8 {
            dropped += q.enqueue(json!(i));
        }
        assert_eq!(dropped, 5);
        assert_eq!(q.len(), 3);
        // Most recent entries survive.
        assert_eq!(q.pop_front().unwrap().payload, json!(5));
        assert_eq!(q.pop_front().unwrap().payload, json!(6));
        assert_eq!(q.pop_front().unwrap().payload, json!(7));
    }

    #[test]
    fn front_does_not_remove() {
        let mut q = OutboundQueue::new(4);
        q.enqueue(json!("a"));
        assert_eq!(q.front().unwrap().payload, json!("a"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn overflow_during_send_does_not_evict_the_successor() {
        let mut q = OutboundQueue::new(2);
        q.enqueue(json!("a"));
        q.enqueue(json!("b"));
        let head_seq = q.front().unwrap().seq;
        // While "a" is in flight, a full-queue enqueue evicts it as oldest.
        q.enqueue(json!("c"));
        assert_eq!(q.front().unwrap().payload, json!("b"));
        // The completed send must not remove "b" in "a"'s place.
        assert!(!q.pop_front_if(head_seq));
        assert_eq!(q.front().unwrap().payload, json!("b"));
        // An unchanged head is still removable by its sequence number.
        let seq = q.front().unwrap().seq;
        assert!(q.pop_front_if(seq));
        assert_eq!(q.pop_front().unwrap().payload, json!("c"));
    }

    #[test]
    fn capacity_is_at_least_one() {
        let mut q = OutboundQueue::new(0);
        q.enqueue(json!(1));
        assert_eq!(q.len(), 1);
        q.enqueue(json!(2));
        assert_eq!(q.len(), 1);
        assert_eq!(q.front().unwrap().payload, json!(2));
    }
}
