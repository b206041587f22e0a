use crate::channel::{Channel, ChannelControl};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// An unbounded blocking FIFO queue.
///
/// The default hand-off channel: every pushed value is retained and delivered
/// in order. `push` is O(1) amortized and only ever blocks on the mutex;
/// `pop` waits on a condition variable while the queue is empty.
///
/// Capacity is unbounded: a pipeline whose upstream stages outpace a slow
/// downstream stage will accumulate values here. Choose a triple-buffer
/// policy when only the latest value matters.
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T: Send + 'static> Channel<T> for BlockingQueue<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn push(&self, value: T) -> Option<T> {
        self.items.lock().push_back(value);
        self.ready.notify_one();
        None
    }

    fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                return value;
            }
            self.ready.wait(&mut items);
        }
    }

    fn pop_unless<P: FnMut() -> bool>(&self, mut pred: P) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                return Some(value);
            }
            if pred() {
                return None;
            }
            self.ready.wait(&mut items);
        }
    }
}

impl<T: Send> ChannelControl for BlockingQueue<T> {
    fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn wake(&self) {
        // Take and release the lock so a popper between its emptiness check
        // and its wait cannot miss the notification.
        drop(self.items.lock());
        self.ready.notify_all();
    }
}
