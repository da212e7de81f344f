//! Dual-Priority Blocking Queue
//!
//! The outbound queue of a connection. It has two FIFO lanes behind one lock:
//!
//! ```text
//!   enqueue(high = true)  ──> [ high lane     ] ──┐
//!                             (unbounded)         ├──> try_dequeue()
//!   enqueue(high = false) ──> [ standard lane ] ──┘    high lane first
//!                             (max_size, blocks)
//! ```
//!
//! One `Mutex` guards both lanes and the closed flag, so enqueue, dequeue and
//! close are totally ordered. A single `Condvar` is shared by blocked
//! producers and blocked consumers; it is signalled only on the transitions
//! that can unblock somebody:
//!
//! - total size going from 0 to 1 (a consumer may be waiting)
//! - the standard lane dropping to `max_size - 1` (a producer may be waiting)
//! - both lanes becoming empty
//! - close / open

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Returned by [`DualPriorityQueue::enqueue`] when the queue is closed.
/// Hands the rejected item back to the caller.
pub struct Closed<T>(pub T);

impl<T> fmt::Debug for Closed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closed(..)")
    }
}

struct Lanes<T> {
    standard: VecDeque<T>,
    high: VecDeque<T>,
    closed: bool,
}

impl<T> Lanes<T> {
    fn len(&self) -> usize {
        self.standard.len() + self.high.len()
    }
}

/// A bounded FIFO with an unbounded queue-jumping lane.
pub struct DualPriorityQueue<T> {
    lanes: Mutex<Lanes<T>>,
    signal: Condvar,
    max_size: usize,
}

impl<T> DualPriorityQueue<T> {
    /// Creates an open queue whose standard lane holds at most `max_size`
    /// items (at least one).
    pub fn new(max_size: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                standard: VecDeque::new(),
                high: VecDeque::new(),
                closed: false,
            }),
            signal: Condvar::new(),
            max_size: max_size.max(1),
        }
    }

    /// Creates a queue with no standard-lane limit.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    fn lock(&self) -> MutexGuard<'_, Lanes<T>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Lanes<T>>) -> MutexGuard<'a, Lanes<T>> {
        self.signal.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Appends an item.
    ///
    /// High-priority items never block. Standard items block the calling
    /// thread while the standard lane is full. Fails if the queue is closed,
    /// including when it is closed while the caller is blocked.
    pub fn enqueue(&self, item: T, high_priority: bool) -> Result<(), Closed<T>> {
        let mut lanes = self.lock();
        if lanes.closed {
            return Err(Closed(item));
        }
        if high_priority {
            lanes.high.push_back(item);
        } else {
            while lanes.standard.len() >= self.max_size && !lanes.closed {
                lanes = self.wait(lanes);
            }
            if lanes.closed {
                return Err(Closed(item));
            }
            lanes.standard.push_back(item);
        }
        if lanes.len() == 1 {
            self.signal.notify_all();
        }
        Ok(())
    }

    /// Removes the next item, high lane first.
    ///
    /// The returned flag is true only if the item overtook at least one
    /// standard item that is still waiting. Returns `None` when both lanes
    /// are empty and either `no_wait` is set or the queue is closed;
    /// otherwise blocks until an item arrives or the queue closes.
    pub fn try_dequeue(&self, no_wait: bool) -> Option<(T, bool)> {
        let mut lanes = self.lock();
        loop {
            if let Some(item) = lanes.high.pop_front() {
                let overtook = !lanes.standard.is_empty();
                if lanes.len() == 0 {
                    self.signal.notify_all();
                }
                return Some((item, overtook));
            }
            if let Some(item) = lanes.standard.pop_front() {
                if lanes.standard.len() == self.max_size - 1 || lanes.len() == 0 {
                    self.signal.notify_all();
                }
                return Some((item, false));
            }
            if no_wait || lanes.closed {
                return None;
            }
            lanes = self.wait(lanes);
        }
    }

    /// Atomically drains both lanes: high-lane items first, then standard
    /// items, each in submission order.
    pub fn dequeue_all(&self) -> Vec<T> {
        let mut lanes = self.lock();
        let mut items = Vec::with_capacity(lanes.len());
        items.extend(lanes.high.drain(..));
        items.extend(lanes.standard.drain(..));
        self.signal.notify_all();
        items
    }

    /// Stops accepting items and releases every blocked thread.
    pub fn close(&self) {
        let mut lanes = self.lock();
        lanes.closed = true;
        self.signal.notify_all();
    }

    /// Accepts items again.
    pub fn open(&self) {
        let mut lanes = self.lock();
        lanes.closed = false;
        self.signal.notify_all();
    }

    /// Returns true once `close` has been called (and `open` has not).
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items in both lanes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if both lanes are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_within_lane() {
        let queue = DualPriorityQueue::unbounded();
        for i in 0..5 {
            queue.enqueue(i, false).unwrap();
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_dequeue(true))
            .map(|(item, _)| item)
            .collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_high_priority_overtakes() {
        let queue = DualPriorityQueue::unbounded();
        queue.enqueue("a", false).unwrap();
        queue.enqueue("b", false).unwrap();
        queue.enqueue("jump", true).unwrap();

        assert_eq!(queue.try_dequeue(true), Some(("jump", true)));
        assert_eq!(queue.try_dequeue(true), Some(("a", false)));
        assert_eq!(queue.try_dequeue(true), Some(("b", false)));
        assert_eq!(queue.try_dequeue(true), None);
    }

    #[test]
    fn test_high_priority_alone_is_not_a_jumper() {
        let queue = DualPriorityQueue::unbounded();
        queue.enqueue(1, true).unwrap();
        assert_eq!(queue.try_dequeue(true), Some((1, false)));
    }

    #[test]
    fn test_high_priority_bypasses_full_lane() {
        let queue = Arc::new(DualPriorityQueue::new(2));
        queue.enqueue(1, false).unwrap();
        queue.enqueue(2, false).unwrap();

        // a third standard producer blocks on the full lane
        let blocked = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(3, false).is_ok())
        };
        thread::sleep(Duration::from_millis(50));

        // the high lane ignores capacity
        queue.enqueue(99, true).unwrap();
        assert_eq!(queue.try_dequeue(true), Some((99, true)));
        assert_eq!(queue.try_dequeue(true), Some((1, false)));

        assert!(blocked.join().unwrap());
        assert_eq!(queue.try_dequeue(true), Some((2, false)));
        assert_eq!(queue.try_dequeue(true), Some((3, false)));
    }

    #[test]
    fn test_backpressure_blocks_until_dequeue() {
        let queue = Arc::new(DualPriorityQueue::new(1));
        queue.enqueue("first", false).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.enqueue("second", false).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst), "producer should be blocked");

        assert_eq!(queue.try_dequeue(true), Some(("first", false)));
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.try_dequeue(true), Some(("second", false)));
    }

    #[test]
    fn test_blocking_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(DualPriorityQueue::unbounded());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.try_dequeue(false))
        };
        thread::sleep(Duration::from_millis(50));
        queue.enqueue(7, false).unwrap();
        assert_eq!(consumer.join().unwrap(), Some((7, false)));
    }

    #[test]
    fn test_close_releases_consumer_and_rejects_producers() {
        let queue: Arc<DualPriorityQueue<i32>> = Arc::new(DualPriorityQueue::unbounded());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.try_dequeue(false))
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);

        let Closed(item) = queue.enqueue(5, true).unwrap_err();
        assert_eq!(item, 5);
        assert!(queue.is_closed());

        queue.open();
        assert!(queue.enqueue(6, false).is_ok());
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let queue = Arc::new(DualPriorityQueue::new(1));
        queue.enqueue(1, false).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(2, false).is_err())
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert!(producer.join().unwrap());
    }

    #[test]
    fn test_closed_queue_still_drains() {
        let queue = DualPriorityQueue::unbounded();
        queue.enqueue(1, false).unwrap();
        queue.close();
        assert_eq!(queue.try_dequeue(false), Some((1, false)));
        assert_eq!(queue.try_dequeue(false), None);
    }

    #[test]
    fn test_dequeue_all_order() {
        let queue = DualPriorityQueue::unbounded();
        queue.enqueue(1, false).unwrap();
        queue.enqueue(10, true).unwrap();
        queue.enqueue(2, false).unwrap();
        queue.enqueue(11, true).unwrap();

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.dequeue_all(), vec![10, 11, 1, 2]);
        assert!(queue.is_empty());
    }
}
