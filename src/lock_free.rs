use crate::channel::{Channel, ChannelControl};
use crossbeam::utils::Backoff;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(not(target_has_atomic = "8"))]
compile_error!("LockFreeTripleBuffer requires native 8-bit atomics");

// Control word layout: three 2-bit slot indices plus an availability bit.
// A single atomic word is what lets the writer rotate write/buffered and the
// reader rotate buffered/read with one CAS each.
const WRITE_SHIFT: u8 = 0;
const BUFFERED_SHIFT: u8 = 2;
const READ_SHIFT: u8 = 4;
const AVAILABLE: u8 = 1 << 6;
const INDEX: u8 = 0b11;

fn pack(write: u8, buffered: u8, read: u8, available: bool) -> u8 {
    (write << WRITE_SHIFT)
        | (buffered << BUFFERED_SHIFT)
        | (read << READ_SHIFT)
        | if available { AVAILABLE } else { 0 }
}

fn write_slot(control: u8) -> u8 {
    (control >> WRITE_SHIFT) & INDEX
}

fn buffered_slot(control: u8) -> u8 {
    (control >> BUFFERED_SHIFT) & INDEX
}

fn read_slot(control: u8) -> u8 {
    (control >> READ_SHIFT) & INDEX
}

fn available(control: u8) -> bool {
    control & AVAILABLE != 0
}

/// A lock-free triple buffer: keep-latest-only, no mutex on the hot path.
///
/// Semantically equivalent to
/// [`BlockingTripleBuffer`](crate::triple_buffer::BlockingTripleBuffer): the
/// writer never waits and overwrites undelivered values, the reader observes
/// the most recent push. The difference is the wait strategy: the reader
/// spins (with exponential backoff) instead of sleeping on a condition
/// variable, so [`wake`](ChannelControl::wake) is a no-op and shutdown is
/// carried entirely by the predicate given to `pop_unless`.
///
/// Strictly single-writer/single-reader. Slot ownership is handed over only
/// through the control-word CAS: the writer owns the write slot, the reader
/// owns the read slot, and the buffered slot belongs to whichever side last
/// completed a rotation. Every at-rest slot except a pending buffered value
/// is `None`, which is what makes it safe for the writer to extract a value
/// it displaced.
pub struct LockFreeTripleBuffer<T> {
    slots: [UnsafeCell<Option<T>>; 3],
    control: AtomicU8,
}

// Safety: a slot is only touched by the side that owns it under the
// control-word protocol, and ownership transfer happens through AcqRel
// operations on `control`. `T: Send` is required because values cross from
// the writer thread to the reader thread.
unsafe impl<T: Send> Send for LockFreeTripleBuffer<T> {}
unsafe impl<T: Send> Sync for LockFreeTripleBuffer<T> {}

impl<T: Send + 'static> LockFreeTripleBuffer<T> {
    /// Take the pending value without waiting, if there is one.
    fn try_take(&self) -> Option<T> {
        let mut control = self.control.load(Ordering::Acquire);
        loop {
            if !available(control) {
                return None;
            }
            let next = pack(
                write_slot(control),
                read_slot(control),
                buffered_slot(control),
                false,
            );
            match self.control.compare_exchange_weak(
                control,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // The old buffered slot is now the read slot and belongs to
                // this thread.
                Ok(_) => return unsafe { (*self.slots[buffered_slot(control) as usize].get()).take() },
                Err(actual) => control = actual,
            }
        }
    }
}

impl<T: Send + 'static> Channel<T> for LockFreeTripleBuffer<T> {
    fn new() -> Self {
        Self {
            slots: [
                UnsafeCell::new(None),
                UnsafeCell::new(None),
                UnsafeCell::new(None),
            ],
            control: AtomicU8::new(pack(0, 1, 2, false)),
        }
    }

    fn push(&self, value: T) -> Option<T> {
        let mut control = self.control.load(Ordering::Acquire);
        // The write slot index never changes under a concurrent reader, so
        // the store does not need to be inside the CAS loop.
        unsafe {
            *self.slots[write_slot(control) as usize].get() = Some(value);
        }
        loop {
            let next = pack(
                buffered_slot(control),
                write_slot(control),
                read_slot(control),
                true,
            );
            match self.control.compare_exchange_weak(
                control,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return if available(control) {
                        // The displaced value now sits in the new write slot,
                        // which this thread owns; hand it back.
                        unsafe { (*self.slots[buffered_slot(control) as usize].get()).take() }
                    } else {
                        None
                    };
                }
                Err(actual) => control = actual,
            }
        }
    }

    fn pop(&self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_take() {
                return value;
            }
            backoff.snooze();
        }
    }

    fn pop_unless<P: FnMut() -> bool>(&self, mut pred: P) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_take() {
                return Some(value);
            }
            if pred() {
                return None;
            }
            backoff.snooze();
        }
    }
}

impl<T: Send> ChannelControl for LockFreeTripleBuffer<T> {
    fn is_empty(&self) -> bool {
        !available(self.control.load(Ordering::Acquire))
    }

    // No thread is ever suspended on this channel; shutdown is observed
    // through the `pop_unless` predicate.
    fn wake(&self) {}
}
