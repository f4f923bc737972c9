//! Urgency-ordered request queue.
//!
//! A max-heap keyed by `(urgency, -sequence)`: the most urgent request comes
//! out first, and requests of equal urgency come out in submission order.
//! Producers never wait; a consumer waiting on an empty queue is parked on a
//! [`Notify`] until the next push.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::error;

use crate::request::Request;

/// Heap entry. Ordering ignores the completion sink.
struct Queued {
    request: Request,
    sequence: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.request.urgency == other.request.urgency && self.sequence == other.sequence
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher urgency first, then lower sequence (older) first
        match self.request.urgency.cmp(&other.request.urgency) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}

struct Inner {
    heap: BinaryHeap<Queued>,
    next_sequence: u64,
    closed: bool,
}

/// Thread-safe priority queue of capture requests.
pub struct PriorityQueue {
    inner: Mutex<Inner>,
    ready: Notify,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Heap operations cannot leave the heap half-updated, so a poisoned
        // lock still guards a valid heap.
        self.inner.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            error!("priority queue lock poisoned; continuing with recovered state");
            poisoned.into_inner()
        })
    }

    /// Insert a request. Never blocks.
    ///
    /// Hands the request back if the queue has been closed.
    pub fn enqueue(&self, request: Request) -> std::result::Result<(), Request> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(request);
            }
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            inner.heap.push(Queued { request, sequence });
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Remove the most urgent request, if any.
    pub fn try_dequeue(&self) -> Option<Request> {
        self.lock().heap.pop().map(|q| q.request)
    }

    /// Remove the most urgent request, waiting for one if the queue is empty.
    ///
    /// Cancel-safe: dropping the future before it completes loses nothing.
    pub async fn dequeue(&self) -> Request {
        loop {
            if let Some(request) = self.try_dequeue() {
                return request;
            }
            // notify_one stores a permit when nobody is waiting, so a push
            // between the check above and this await is not missed.
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Refuse further requests and take everything still queued,
    /// most urgent first.
    pub fn close(&self) -> Vec<Request> {
        let mut inner = self.lock();
        inner.closed = true;
        let mut remaining = Vec::with_capacity(inner.heap.len());
        while let Some(q) = inner.heap.pop() {
            remaining.push(q.request);
        }
        remaining
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("PriorityQueue")
            .field("len", &inner.heap.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Completion;

    fn queued(urgency: i32, sequence: u64) -> Queued {
        Queued {
            request: Request::new(urgency, Completion::from_fn(|_| {})),
            sequence,
        }
    }

    #[test]
    fn higher_urgency_orders_first() {
        assert!(queued(5, 10) > queued(1, 0));
    }

    #[test]
    fn equal_urgency_orders_older_first() {
        assert!(queued(3, 0) > queued(3, 1));
    }

    #[test]
    fn heap_pops_by_urgency_then_sequence() {
        let mut heap = BinaryHeap::new();
        heap.push(queued(1, 0));
        heap.push(queued(3, 1));
        heap.push(queued(3, 2));
        heap.push(queued(2, 3));

        let order: Vec<(i32, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|q| (q.request.urgency, q.sequence))
            .collect();
        assert_eq!(order, vec![(3, 1), (3, 2), (2, 3), (1, 0)]);
    }
}
