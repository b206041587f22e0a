//! The per-thread loops that drive a pipeline's stages.
//!
//! Each worker owns its stage function, shares its input and output channels
//! with its neighbours, and re-checks the stop flag between any two values.
//! Three loops cover every stage role: `relay` for head, middle and
//! tail-output stages, `consume` for a consumer tail, `produce` for a
//! producer head.

use crate::activity::Activity;
#[cfg(not(test))]
use crate::channel::Channel;
#[cfg(test)]
use crate::channel::{Channel, ChannelControl};
use crate::metrics::StageStats;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a worker's output lands, for in-flight accounting.
///
/// A push onto an internal edge keeps the value in flight unless the push
/// displaced an undelivered value; delivery into the egress settles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Forward,
    Final,
}

fn account(delivery: Delivery, displaced: bool, activity: &Activity, stats: &StageStats) {
    if displaced {
        stats.record_dropped();
    }
    match delivery {
        Delivery::Final => activity.settle(),
        Delivery::Forward if displaced => activity.settle(),
        Delivery::Forward => {}
    }
}

/// Loop for a stage with both an input and an output channel.
///
/// Covers the head-input, middle and tail-output roles; they differ only in
/// which channels they are wired to. Wakes the downstream channel on exit so
/// the next worker re-checks the stop flag.
pub(crate) fn relay<T, U, Ci, Co, F>(
    input: Arc<Ci>,
    output: Arc<Co>,
    mut f: F,
    stop: Arc<AtomicBool>,
    activity: Arc<Activity>,
    stats: Arc<StageStats>,
    delivery: Delivery,
) where
    T: Send + 'static,
    U: Send + 'static,
    Ci: Channel<T>,
    Co: Channel<U>,
    F: FnMut(T) -> U,
{
    while !stop.load(Ordering::Relaxed) {
        let Some(value) = input.pop_unless(|| stop.load(Ordering::Relaxed)) else {
            break;
        };
        let result = f(value);
        stats.record_processed();
        let displaced = output.push(result);
        account(delivery, displaced.is_some(), &activity, &stats);
    }
    output.wake();
}

/// Loop for a consumer tail: applies the sink function and settles the value.
pub(crate) fn consume<T, Ci, F>(
    input: Arc<Ci>,
    mut f: F,
    stop: Arc<AtomicBool>,
    activity: Arc<Activity>,
    stats: Arc<StageStats>,
) where
    T: Send + 'static,
    Ci: Channel<T>,
    F: FnMut(T),
{
    while !stop.load(Ordering::Relaxed) {
        let Some(value) = input.pop_unless(|| stop.load(Ordering::Relaxed)) else {
            break;
        };
        f(value);
        stats.record_processed();
        activity.settle();
    }
}

/// Loop for a producer head: generates a value per iteration while unpaused.
pub(crate) fn produce<U, Co, F>(
    output: Arc<Co>,
    mut f: F,
    stop: Arc<AtomicBool>,
    gate: Arc<PauseGate>,
    activity: Arc<Activity>,
    stats: Arc<StageStats>,
    delivery: Delivery,
) where
    U: Send + 'static,
    Co: Channel<U>,
    F: FnMut() -> U,
{
    loop {
        gate.block_while_paused(&stop);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        activity.charge();
        let value = f();
        stats.record_processed();
        let displaced = output.push(value);
        account(delivery, displaced.is_some(), &activity, &stats);
    }
    output.wake();
}

/// The pause flag of a producer-headed pipeline.
///
/// A paused producer sleeps on the condition variable instead of polling the
/// flag; `resume` and shutdown wake it.
#[derive(Debug, Default)]
pub(crate) struct PauseGate {
    paused: Mutex<bool>,
    unpaused: Condvar,
}

impl PauseGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub(crate) fn resume(&self) {
        *self.paused.lock() = false;
        self.unpaused.notify_all();
    }

    pub(crate) fn paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block while paused, unless the stop flag is raised.
    pub(crate) fn block_while_paused(&self, stop: &AtomicBool) {
        let mut paused = self.paused.lock();
        while *paused && !stop.load(Ordering::Relaxed) {
            self.unpaused.wait(&mut paused);
        }
    }

    /// Wake a producer blocked on the gate so it re-checks the stop flag.
    pub(crate) fn wake(&self) {
        drop(self.paused.lock());
        self.unpaused.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BlockingQueue;
    use crate::triple_buffer::BlockingTripleBuffer;
    use std::thread;
    use std::time::Duration;

    fn harness() -> (Arc<AtomicBool>, Arc<Activity>, Arc<StageStats>) {
        (
            Arc::new(AtomicBool::new(false)),
            Arc::new(Activity::new()),
            Arc::new(StageStats::new()),
        )
    }

    #[test]
    fn relay_transforms_and_forwards_in_order() {
        let (stop, activity, stats) = harness();
        let input: Arc<BlockingQueue<i32>> = Arc::new(Channel::new());
        let output: Arc<BlockingQueue<i32>> = Arc::new(Channel::new());

        for i in 0..5 {
            activity.charge();
            input.push(i);
        }

        let worker = {
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            let (stop, activity) = (Arc::clone(&stop), Arc::clone(&activity));
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                relay(input, output, |x| x * 10, stop, activity, stats, Delivery::Forward)
            })
        };

        for i in 0..5 {
            assert_eq!(output.pop(), i * 10);
        }
        stop.store(true, Ordering::Relaxed);
        input.wake();
        worker.join().unwrap();
        assert_eq!(stats.processed(), 5);
        assert_eq!(stats.dropped(), 0);
    }

    #[test]
    fn relay_settles_on_final_delivery() {
        let (stop, activity, stats) = harness();
        let input: Arc<BlockingQueue<i32>> = Arc::new(Channel::new());
        let output: Arc<BlockingQueue<i32>> = Arc::new(Channel::new());

        activity.charge();
        input.push(1);

        let worker = {
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            let (stop, activity) = (Arc::clone(&stop), Arc::clone(&activity));
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                relay(input, output, |x| x + 1, stop, activity, stats, Delivery::Final)
            })
        };

        assert_eq!(output.pop(), 2);
        activity.wait_idle();
        stop.store(true, Ordering::Relaxed);
        input.wake();
        worker.join().unwrap();
    }

    #[test]
    fn relay_settles_displaced_values() {
        let (stop, activity, stats) = harness();
        let input: Arc<BlockingQueue<i32>> = Arc::new(Channel::new());
        let output: Arc<BlockingTripleBuffer<i32>> = Arc::new(Channel::new());

        for i in 0..10 {
            activity.charge();
            input.push(i);
        }

        let worker = {
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            let (stop, activity) = (Arc::clone(&stop), Arc::clone(&activity));
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                relay(input, output, |x| x, stop, activity, stats, Delivery::Forward)
            })
        };

        // Nine of the ten values are overwritten in the triple buffer; the
        // one survivor stays charged until somebody consumes it.
        while activity.in_flight() > 1 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(output.pop(), 9);
        assert_eq!(stats.processed(), 10);
        assert_eq!(stats.dropped(), 9);

        stop.store(true, Ordering::Relaxed);
        input.wake();
        worker.join().unwrap();
    }

    #[test]
    fn consume_drains_and_settles() {
        let (stop, activity, stats) = harness();
        let input: Arc<BlockingQueue<i32>> = Arc::new(Channel::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            activity.charge();
            input.push(i);
        }

        let worker = {
            let input = Arc::clone(&input);
            let (stop, activity) = (Arc::clone(&stop), Arc::clone(&activity));
            let stats = Arc::clone(&stats);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                consume(input, move |x| seen.lock().push(x), stop, activity, stats)
            })
        };

        activity.wait_idle();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
        assert_eq!(stats.processed(), 4);
        stop.store(true, Ordering::Relaxed);
        input.wake();
        worker.join().unwrap();
    }

    #[test]
    fn produce_respects_gate_and_stop() {
        let (stop, activity, stats) = harness();
        let gate = Arc::new(PauseGate::new());
        let output: Arc<BlockingQueue<u64>> = Arc::new(Channel::new());

        gate.pause();
        let worker = {
            let output = Arc::clone(&output);
            let (stop, activity) = (Arc::clone(&stop), Arc::clone(&activity));
            let (gate, stats) = (Arc::clone(&gate), Arc::clone(&stats));
            let mut next = 0u64;
            thread::spawn(move || {
                produce(
                    output,
                    move || {
                        next += 1;
                        next
                    },
                    stop,
                    gate,
                    activity,
                    stats,
                    Delivery::Forward,
                )
            })
        };

        // Paused producers generate nothing.
        thread::sleep(Duration::from_millis(20));
        assert!(output.is_empty());

        gate.resume();
        assert_eq!(output.pop(), 1);
        assert_eq!(output.pop(), 2);

        stop.store(true, Ordering::Relaxed);
        gate.wake();
        worker.join().unwrap();
    }

    #[test]
    fn gate_wake_releases_paused_producer_on_stop() {
        let stop = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(PauseGate::new());
        gate.pause();

        let blocked = {
            let (gate, stop) = (Arc::clone(&gate), Arc::clone(&stop));
            thread::spawn(move || gate.block_while_paused(&stop))
        };

        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        gate.wake();
        blocked.join().unwrap();
        assert!(gate.paused());
    }
}
