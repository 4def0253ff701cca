// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! FIFO of user messages submitted while a request is in flight. A single
//! scheduler reader drains it between turns; any number of writers may
//! enqueue concurrently.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A user message enqueued while a request is in flight.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub content: String,
    pub attachments: Vec<String>,
    pub request_id: String,
}

impl QueuedMessage {
    pub fn new(content: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self { content: content.into(), attachments: Vec::new(), request_id: request_id.into() }
    }
}

/// Unbounded FIFO queue. `drain_all` is atomic with respect to `enqueue`:
/// it swaps the entire backing deque out under one lock acquisition, so any
/// message enqueued after the swap lands in the queue for the *next* drain,
/// never the one in progress.
#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, message: QueuedMessage) {
        self.inner.lock().unwrap().push_back(message);
    }

    pub fn dequeue(&self) -> Option<QueuedMessage> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Removes and returns every message currently queued, in FIFO order.
    pub fn drain_all(&self) -> Vec<QueuedMessage> {
        let mut guard = self.inner.lock().unwrap();
        std::mem::take(&mut *guard).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q = MessageQueue::new();
        q.enqueue(QueuedMessage::new("a", "r1"));
        q.enqueue(QueuedMessage::new("b", "r2"));
        assert_eq!(q.dequeue().unwrap().content, "a");
        assert_eq!(q.dequeue().unwrap().content, "b");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn is_empty_reflects_state() {
        let q = MessageQueue::new();
        assert!(q.is_empty());
        q.enqueue(QueuedMessage::new("a", "r1"));
        assert!(!q.is_empty());
    }

    #[test]
    fn drain_all_empties_the_queue_and_preserves_order() {
        let q = MessageQueue::new();
        q.enqueue(QueuedMessage::new("a", "r1"));
        q.enqueue(QueuedMessage::new("b", "r2"));
        let drained = q.drain_all();
        assert_eq!(drained.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(q.is_empty());
    }

    #[test]
    fn messages_enqueued_after_drain_are_not_lost() {
        let q = MessageQueue::new();
        q.enqueue(QueuedMessage::new("a", "r1"));
        let first_batch = q.drain_all();
        q.enqueue(QueuedMessage::new("b", "r2"));
        let second_batch = q.drain_all();
        assert_eq!(first_batch.len(), 1);
        assert_eq!(second_batch.len(), 1);
        assert_eq!(second_batch[0].content, "b");
    }

    #[test]
    fn drain_all_on_empty_queue_returns_empty_vec() {
        let q = MessageQueue::new();
        assert!(q.drain_all().is_empty());
    }
}
