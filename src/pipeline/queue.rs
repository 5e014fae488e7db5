//! FIFO work queue between stations.
//!
//! A thin wrapper over a crossbeam channel that also counts unfinished items,
//! so the coordinator can tell "empty and idle" apart from "empty because the
//! worker is still busy with the last item".

use crate::cancel::CancellationToken;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Slice used when a bounded queue is full, so a blocked producer keeps
/// observing cancellation.
const FULL_QUEUE_RETRY: Duration = Duration::from_millis(100);

enum Envelope<T> {
    Item(T),
    Shutdown,
}

/// Result of a timed receive.
#[derive(Debug, PartialEq, Eq)]
pub enum Polled<T> {
    Item(T),
    /// The shutdown sentinel was dequeued.
    Shutdown,
    /// Nothing arrived within the timeout.
    Empty,
}

pub struct WorkQueue<T> {
    tx: Sender<Envelope<T>>,
    rx: Receiver<Envelope<T>>,
    unfinished: AtomicUsize,
}

impl<T: Send> WorkQueue<T> {
    /// Creates a queue. A capacity of zero means unbounded.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = if capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(capacity)
        };
        Self {
            tx,
            rx,
            unfinished: AtomicUsize::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Enqueues an item, waiting for room if the queue is bounded and full.
    ///
    /// Returns `false` if the item was dropped because `cancel` fired while
    /// waiting for room.
    pub fn put(&self, item: T, cancel: &CancellationToken) -> bool {
        // Count before sending so a consumer can never observe the item
        // without it being accounted for.
        self.unfinished.fetch_add(1, Ordering::SeqCst);

        let mut envelope = Envelope::Item(item);
        loop {
            match self.tx.send_timeout(envelope, FULL_QUEUE_RETRY) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if cancel.is_cancelled() {
                        self.task_done();
                        return false;
                    }
                    envelope = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.task_done();
                    return false;
                }
            }
        }
    }

    /// Waits up to `timeout` for the next item.
    pub fn recv_timeout(&self, timeout: Duration) -> Polled<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(Envelope::Item(item)) => Polled::Item(item),
            Ok(Envelope::Shutdown) => Polled::Shutdown,
            Err(RecvTimeoutError::Timeout) => Polled::Empty,
            Err(RecvTimeoutError::Disconnected) => Polled::Shutdown,
        }
    }

    /// Marks one dequeued item as fully handled.
    pub fn task_done(&self) {
        if self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            tracing::debug!("task_done called with no unfinished items");
        }
    }

    /// Items enqueued but not yet marked done, including the one in flight.
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    /// Items waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Pushes the shutdown sentinel.
    ///
    /// The sentinel is not counted as unfinished work. On a full bounded
    /// queue it is skipped; the worker then exits through its other
    /// termination checks.
    pub fn close(&self) {
        match self.tx.try_send(Envelope::Shutdown) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!("queue full, shutdown sentinel skipped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn fifo_order() {
        let queue = WorkQueue::unbounded();
        let cancel = CancellationToken::new();
        for i in 0..5 {
            assert!(queue.put(i, &cancel));
        }
        let drained: Vec<i32> = (0..5)
            .map(|_| match queue.recv_timeout(SHORT) {
                Polled::Item(i) => i,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn unfinished_counts_until_task_done() {
        let queue = WorkQueue::unbounded();
        let cancel = CancellationToken::new();
        queue.put("a", &cancel);
        queue.put("b", &cancel);
        assert_eq!(queue.unfinished(), 2);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.recv_timeout(SHORT), Polled::Item("a"));
        // Dequeued but not done yet.
        assert_eq!(queue.unfinished(), 2);
        assert_eq!(queue.len(), 1);

        queue.task_done();
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn task_done_never_underflows() {
        let queue: WorkQueue<u8> = WorkQueue::unbounded();
        queue.task_done();
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn empty_poll_times_out() {
        let queue: WorkQueue<u8> = WorkQueue::unbounded();
        let start = Instant::now();
        assert_eq!(queue.recv_timeout(SHORT), Polled::Empty);
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn close_delivers_sentinel_after_items() {
        let queue = WorkQueue::unbounded();
        let cancel = CancellationToken::new();
        queue.put(1, &cancel);
        queue.close();
        assert_eq!(queue.unfinished(), 1);
        assert_eq!(queue.recv_timeout(SHORT), Polled::Item(1));
        assert_eq!(queue.recv_timeout(SHORT), Polled::Shutdown);
    }

    #[test]
    fn bounded_put_gives_up_on_cancel() {
        let queue = Arc::new(WorkQueue::new(1));
        let cancel = CancellationToken::new();
        assert!(queue.put(1, &cancel));

        let producer_queue = queue.clone();
        let producer_cancel = cancel.clone();
        let producer = thread::spawn(move || producer_queue.put(2, &producer_cancel));

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        assert!(!producer.join().unwrap());
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn bounded_put_waits_for_room() {
        let queue = Arc::new(WorkQueue::new(1));
        let cancel = CancellationToken::new();
        queue.put(1, &cancel);

        let consumer_queue = queue.clone();
        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            consumer_queue.recv_timeout(Duration::from_secs(1))
        });

        assert!(queue.put(2, &cancel));
        assert_eq!(consumer.join().unwrap(), Polled::Item(1));
        assert_eq!(queue.recv_timeout(SHORT), Polled::Item(2));
    }
}
