//! The running pipeline and its public surface.
//!
//! A [`Pipeline`] owns every channel and every worker thread it was built
//! with. Its capabilities follow its shape: only a caller-fed pipeline has
//! [`input`](Pipeline::input), only a producer-headed one has
//! [`pause`](Pipeline::pause)/[`resume`](Pipeline::resume), only a polled one
//! has [`wait_get`](Pipeline::wait_get)/[`try_get`](Pipeline::try_get). The
//! shape is encoded in the handle's type parameters, so calling an operation
//! a pipeline does not support is a compile error.
//!
//! Dropping the handle stops the pipeline: the stop flag is raised, every
//! channel (and the pause gate, if any) is woken, and every worker thread is
//! joined before `drop` returns. Values still travelling are discarded with
//! the channels.

use crate::activity::Activity;
use crate::channel::{Channel, ChannelControl};
use crate::error::{PipelineError, Result};
use crate::metrics::{StageStats, StatsSnapshot};
use crate::policy::Policy;
use crate::worker::PauseGate;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Runtime state shared by every pipeline shape: the stop flag, the channels
/// to wake at shutdown, the in-flight gauge and the worker threads.
pub(crate) struct Core {
    stop: Arc<AtomicBool>,
    gate: Option<Arc<PauseGate>>,
    channels: Vec<Arc<dyn ChannelControl>>,
    activity: Arc<Activity>,
    stats: Vec<Arc<StageStats>>,
    workers: Vec<(usize, JoinHandle<()>)>,
}

impl Core {
    pub(crate) fn new(
        stop: Arc<AtomicBool>,
        gate: Option<Arc<PauseGate>>,
        channels: Vec<Arc<dyn ChannelControl>>,
        activity: Arc<Activity>,
        stats: Vec<Arc<StageStats>>,
        workers: Vec<(usize, JoinHandle<()>)>,
    ) -> Self {
        Self {
            stop,
            gate,
            channels,
            activity,
            stats,
            workers,
        }
    }

    /// Stop the pipeline and join every worker. Safe to call twice; the
    /// second call finds no workers left.
    fn run_shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wake();
        }
        for channel in &self.channels {
            channel.wake();
        }
        let mut panicked = None;
        for (stage, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked.get_or_insert(stage);
            }
        }
        match panicked {
            Some(stage) => Err(PipelineError::StagePanicked { stage }),
            None => Ok(()),
        }
    }
}

/// Head of a caller-fed pipeline: the ingress channel.
///
/// The mutex serializes `input` calls so a handle shared through an `Arc`
/// cannot become a second concurrent producer on the ingress channel.
pub struct Inlet<I: Send + 'static, P: Policy> {
    channel: Arc<P::Channel<I>>,
    feed: Mutex<()>,
}

impl<I: Send + 'static, P: Policy> Inlet<I, P> {
    pub(crate) fn new(channel: Arc<P::Channel<I>>) -> Self {
        Self {
            channel,
            feed: Mutex::new(()),
        }
    }
}

/// Head of a self-feeding pipeline: the pause gate.
pub struct ProducerHead {
    gate: Arc<PauseGate>,
}

impl ProducerHead {
    pub(crate) fn new(gate: Arc<PauseGate>) -> Self {
        Self { gate }
    }
}

/// Tail of a polled pipeline: the egress channel, with the same serialization
/// as [`Inlet`] on the consuming side.
pub struct Outlet<O: Send + 'static, P: Policy> {
    channel: Arc<P::Channel<O>>,
    poll: Mutex<()>,
}

impl<O: Send + 'static, P: Policy> Outlet<O, P> {
    pub(crate) fn new(channel: Arc<P::Channel<O>>) -> Self {
        Self {
            channel,
            poll: Mutex::new(()),
        }
    }
}

/// Tail of a pipeline that ends in a sink stage; there is nothing to poll.
pub struct Consumed;

/// A running pipeline.
///
/// `Head` is [`Inlet`] or [`ProducerHead`], `Tail` is [`Outlet`] or
/// [`Consumed`]; the combination decides which methods exist. The handle is
/// movable, and can be shared with [`into_shared`](Pipeline::into_shared);
/// with a shared handle, keep one thread feeding and one thread polling.
///
/// If a stage function panics, its worker thread ends and values stop
/// flowing past it; the rest of the pipeline stays up until the handle is
/// dropped or [`shutdown`](Pipeline::shutdown) is called, and `shutdown`
/// reports the panicked stage.
pub struct Pipeline<Head, Tail> {
    head: Head,
    tail: Tail,
    core: Core,
}

impl<Head, Tail> Pipeline<Head, Tail> {
    pub(crate) fn assemble(head: Head, tail: Tail, core: Core) -> Self {
        Self { head, tail, core }
    }

    /// True when no value is queued anywhere and no stage is mid-computation.
    ///
    /// An output resting in the egress, waiting to be polled, does not count
    /// as in flight.
    pub fn idle(&self) -> bool {
        self.core.activity.is_idle()
    }

    /// Block until [`idle`](Pipeline::idle) holds.
    ///
    /// With an unpaused producer head this may never return; pause the
    /// producer first.
    pub fn wait_until_idle(&self) {
        self.core.activity.wait_idle();
    }

    /// Number of values currently travelling through the pipeline.
    pub fn in_flight(&self) -> u64 {
        self.core.activity.in_flight()
    }

    /// Number of stages, the producer and consumer included.
    pub fn stages(&self) -> usize {
        self.core.stats.len()
    }

    /// Counters for the stage at `index`; 0 is the head.
    pub fn stage_stats(&self, index: usize) -> Option<StatsSnapshot> {
        self.core.stats.get(index).map(|stats| stats.snapshot())
    }

    /// Counters for every stage, head first.
    pub fn all_stats(&self) -> Vec<StatsSnapshot> {
        self.core.stats.iter().map(|stats| stats.snapshot()).collect()
    }

    /// Stop the pipeline, join every worker and report worker panics.
    ///
    /// Dropping the handle does the same teardown but swallows the report.
    pub fn shutdown(mut self) -> Result<()> {
        self.core.run_shutdown()
    }

    /// Wrap the handle for shared ownership.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl<I, P, Tail> Pipeline<Inlet<I, P>, Tail>
where
    I: Send + 'static,
    P: Policy,
{
    /// Feed one value into the pipeline.
    ///
    /// Never blocks. Under a triple-buffer policy this overwrites a previous
    /// input the first stage has not picked up yet.
    pub fn input(&self, value: I) {
        let _feeding = self.head.feed.lock();
        self.core.activity.charge();
        if let Some(displaced) = self.head.channel.push(value) {
            drop(displaced);
            self.core.activity.settle();
        }
    }
}

impl<Tail> Pipeline<ProducerHead, Tail> {
    /// Stop the producer after its current iteration; the rest of the
    /// pipeline keeps draining.
    pub fn pause(&self) {
        self.head.gate.pause();
    }

    /// Let a paused producer run again.
    pub fn resume(&self) {
        self.head.gate.resume();
    }

    /// True while the producer is not paused.
    pub fn producing(&self) -> bool {
        !self.head.gate.paused()
    }
}

impl<Head, O, P> Pipeline<Head, Outlet<O, P>>
where
    O: Send + 'static,
    P: Policy,
{
    /// Block until the pipeline delivers an output, and take it.
    ///
    /// Waits indefinitely; use [`try_get`](Pipeline::try_get) to poll.
    pub fn wait_get(&self) -> O {
        let _polling = self.tail.poll.lock();
        self.tail.channel.pop()
    }

    /// Take an output if one is ready.
    pub fn try_get(&self) -> Option<O> {
        let _polling = self.tail.poll.lock();
        self.tail.channel.pop_unless(|| true)
    }

    /// True when an output is waiting. Advisory.
    pub fn available(&self) -> bool {
        !self.tail.channel.is_empty()
    }

    /// True when no output is waiting. Advisory.
    pub fn empty(&self) -> bool {
        self.tail.channel.is_empty()
    }
}

impl<Head, Tail> Drop for Pipeline<Head, Tail> {
    fn drop(&mut self) {
        let _ = self.core.run_shutdown();
    }
}
