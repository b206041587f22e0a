use crate::channel::{Channel, ChannelControl};
use parking_lot::{Condvar, Mutex};

/// Slot bookkeeping behind the mutex.
///
/// `slots[buffered]` holds a value exactly when `available` is set; the
/// `input` and `output` slots are always empty between calls.
struct State<T> {
    slots: [Option<T>; 3],
    input: usize,
    buffered: usize,
    output: usize,
    available: bool,
}

impl<T> State<T> {
    /// Take the pending value if one is available.
    fn take_ready(&mut self) -> Option<T> {
        if !self.available {
            return None;
        }
        std::mem::swap(&mut self.output, &mut self.buffered);
        self.available = false;
        let slot = self.output;
        self.slots[slot].take()
    }
}

/// A blocking triple buffer: a keep-latest-only hand-off slot.
///
/// The writer never blocks; a push that arrives before the previous value
/// was read overwrites it, and the displaced value is handed back to the
/// caller. The reader waits on a condition variable and always observes the
/// most recent pushed value.
///
/// Storage is three `Option` slots, so the element type does not need a
/// `Default` impl and nothing is constructed until the first push.
pub struct BlockingTripleBuffer<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T: Send + 'static> Channel<T> for BlockingTripleBuffer<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slots: [None, None, None],
                input: 0,
                buffered: 1,
                output: 2,
                available: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn push(&self, value: T) -> Option<T> {
        let displaced;
        {
            let mut state = self.state.lock();
            let slot = state.input;
            state.slots[slot] = Some(value);
            let state = &mut *state;
            std::mem::swap(&mut state.input, &mut state.buffered);
            displaced = if state.available {
                let stale = state.input;
                state.slots[stale].take()
            } else {
                None
            };
            state.available = true;
        }
        self.ready.notify_one();
        displaced
    }

    fn pop(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.take_ready() {
                return value;
            }
            self.ready.wait(&mut state);
        }
    }

    fn pop_unless<P: FnMut() -> bool>(&self, mut pred: P) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.take_ready() {
                return Some(value);
            }
            if pred() {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }
}

impl<T: Send> ChannelControl for BlockingTripleBuffer<T> {
    fn is_empty(&self) -> bool {
        !self.state.lock().available
    }

    fn wake(&self) {
        drop(self.state.lock());
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn delivers_latest_value() {
        let buffer = BlockingTripleBuffer::new();
        assert!(buffer.push(1).is_none());
        assert_eq!(buffer.push(2), Some(1));
        assert_eq!(buffer.push(3), Some(2));
        assert_eq!(buffer.pop(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn push_after_pop_starts_fresh() {
        let buffer = BlockingTripleBuffer::new();
        buffer.push(1);
        assert_eq!(buffer.pop(), 1);
        assert!(buffer.push(2).is_none());
        assert_eq!(buffer.pop(), 2);
    }

    #[test]
    fn supports_types_without_default() {
        struct NoDefault(#[allow(dead_code)] String);

        let buffer = BlockingTripleBuffer::new();
        buffer.push(NoDefault("a".into()));
        let NoDefault(s) = buffer.pop();
        assert_eq!(s, "a");
    }

    #[test]
    fn pop_unless_sees_predicate() {
        let buffer: BlockingTripleBuffer<i32> = BlockingTripleBuffer::new();
        assert_eq!(buffer.pop_unless(|| true), None);
        buffer.push(9);
        assert_eq!(buffer.pop_unless(|| true), Some(9));
    }

    #[test]
    fn reader_blocks_until_write() {
        let buffer = Arc::new(BlockingTripleBuffer::new());
        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.pop())
        };
        thread::sleep(Duration::from_millis(20));
        buffer.push("value");
        assert_eq!(reader.join().unwrap(), "value");
    }

    #[test]
    fn repeated_overwrites_keep_one_value_pending() {
        let buffer = BlockingTripleBuffer::new();
        let mut displaced = 0;
        for i in 0..100 {
            if buffer.push(i).is_some() {
                displaced += 1;
            }
        }
        assert_eq!(displaced, 99);
        assert_eq!(buffer.pop(), 99);
        assert!(buffer.is_empty());
    }
}
