use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Gauge of values currently travelling through a pipeline.
///
/// A value is charged when it enters (a handle `input` call or one producer
/// invocation) and settled exactly once when it leaves: consumed by a
/// consumer stage, displaced by a latest-wins overwrite, or delivered into
/// the egress channel. A value resting in the egress is considered settled;
/// it is no longer moving and is waiting only for the caller to poll it.
///
/// The pipeline's `idle` and `wait_until_idle` are reads of this gauge, so
/// idleness accounts for values a stage is still processing, not just for
/// channel emptiness.
#[derive(Debug, Default)]
pub(crate) struct Activity {
    in_flight: AtomicU64,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A value entered the pipeline.
    pub(crate) fn charge(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// A previously charged value left the pipeline.
    ///
    /// Release ordering so that whatever the settling stage did with the
    /// value is visible to a thread that observes the pipeline as idle.
    pub(crate) fn settle(&self) {
        self.in_flight.fetch_sub(1, Ordering::Release);
    }

    pub(crate) fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    /// Block until the gauge reaches zero. Spins briefly, then sleeps.
    pub(crate) fn wait_idle(&self) {
        let backoff = Backoff::new();
        while !self.is_idle() {
            if backoff.is_completed() {
                thread::sleep(Duration::from_micros(50));
            } else {
                backoff.snooze();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn charge_and_settle_balance() {
        let activity = Activity::new();
        assert!(activity.is_idle());
        activity.charge();
        activity.charge();
        assert_eq!(activity.in_flight(), 2);
        activity.settle();
        assert!(!activity.is_idle());
        activity.settle();
        assert!(activity.is_idle());
    }

    #[test]
    fn wait_idle_unblocks_when_settled() {
        let activity = Arc::new(Activity::new());
        for _ in 0..100 {
            activity.charge();
        }

        let settler = {
            let activity = Arc::clone(&activity);
            thread::spawn(move || {
                for _ in 0..100 {
                    activity.settle();
                }
            })
        };

        activity.wait_idle();
        assert!(activity.is_idle());
        settler.join().unwrap();
    }
}
