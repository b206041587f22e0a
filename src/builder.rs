//! Pipeline construction.
//!
//! A pipeline is declared head-first: pick an ingress (`input` for caller-fed
//! pipelines, `producer` for self-feeding ones), append stages, then close
//! the chain with `polled` (an egress the caller drains) or `consume` (a sink
//! stage). Channel types are resolved while the chain is declared: each
//! `stage` call requires a function that accepts the previous stage's output,
//! so a mismatched chain fails to compile with both types in the error.
//!
//! Workers are spawned tail-first so every stage's consumer exists before
//! anything can feed it, and the head is spawned last. If any spawn fails the
//! builder stops and wakes what it already started, joins it, and returns the
//! failure; no thread outlives a failed build.

use crate::activity::Activity;
use crate::channel::{Channel, ChannelControl};
use crate::error::{PipelineError, Result};
use crate::metrics::StageStats;
use crate::pipeline::{Consumed, Core, Inlet, Outlet, Pipeline, ProducerHead};
use crate::policy::{Policy, Queue};
use crate::worker::{self, Delivery, PauseGate};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Options applied to every worker thread of the pipeline under construction.
#[derive(Debug, Clone, Default)]
struct BuildOptions {
    stack_size: Option<usize>,
}

/// Deferred construction of one suffix of the stage chain.
///
/// Calling the spawner creates the input channels and worker threads for
/// every stage accumulated so far, tail-first, wiring the last stage into
/// `sink`; it returns the channel the first stage reads from.
type Spawner<I, O, P> = Box<
    dyn FnOnce(
            Arc<<P as Policy>::Channel<O>>,
            Delivery,
            &mut Assembler,
        ) -> Result<Arc<<P as Policy>::Channel<I>>>
        + Send,
>;

/// Entry point for declaring a pipeline.
///
/// # Example
///
/// ```
/// use conveyor::PipelineBuilder;
///
/// let pipeline = PipelineBuilder::new()
///     .input::<i32>()
///     .stage(|x: i32| x * x)
///     .polled()?;
///
/// pipeline.input(4);
/// assert_eq!(pipeline.wait_get(), 16);
/// # Ok::<(), conveyor::PipelineError>(())
/// ```
pub struct PipelineBuilder<P: Policy = Queue> {
    options: BuildOptions,
    _policy: PhantomData<P>,
}

impl PipelineBuilder<Queue> {
    /// Create a builder with the default queue policy.
    pub fn new() -> Self {
        Self {
            options: BuildOptions::default(),
            _policy: PhantomData,
        }
    }
}

impl Default for PipelineBuilder<Queue> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Policy> PipelineBuilder<P> {
    /// Select the channel policy used for every edge of the pipeline.
    pub fn policy<P2: Policy>(self, _policy: P2) -> PipelineBuilder<P2> {
        PipelineBuilder {
            options: self.options,
            _policy: PhantomData,
        }
    }

    /// Set the stack size, in bytes, for every worker thread.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.options.stack_size = Some(bytes);
        self
    }

    /// Declare a caller-fed pipeline whose inputs are values of type `I`.
    ///
    /// Multi-argument inputs are tuples; the first stage destructures them:
    /// `.input::<(i32, i32)>().stage(|(x, y): (i32, i32)| x + y)`.
    pub fn input<I: Send + 'static>(self) -> InputChain<I, I, P> {
        let spawn: Spawner<I, I, P> = Box::new(|sink, _delivery, _asm| Ok(sink));
        InputChain {
            spawn,
            stages: 0,
            options: self.options,
        }
    }

    /// Declare a self-feeding pipeline whose head repeatedly calls `f`.
    ///
    /// The producer starts running as soon as the pipeline is built; use
    /// [`pause`](Pipeline::pause) and [`resume`](Pipeline::resume) on the
    /// handle to gate it.
    pub fn producer<F, H>(self, f: F) -> ProducerChain<F, H, H, P>
    where
        F: FnMut() -> H + Send + 'static,
        H: Send + 'static,
    {
        let spawn: Spawner<H, H, P> = Box::new(|sink, _delivery, _asm| Ok(sink));
        ProducerChain {
            producer: f,
            spawn,
            stages: 0,
            options: self.options,
        }
    }
}

/// A caller-fed pipeline under construction: inputs of type `I`, current
/// chain output of type `O`.
pub struct InputChain<I: Send + 'static, O: Send + 'static, P: Policy> {
    spawn: Spawner<I, O, P>,
    stages: usize,
    options: BuildOptions,
}

impl<I, O, P> InputChain<I, O, P>
where
    I: Send + 'static,
    O: Send + 'static,
    P: Policy,
{
    /// Append a stage. It must accept the previous stage's output.
    pub fn stage<F, U>(self, f: F) -> InputChain<I, U, P>
    where
        F: FnMut(O) -> U + Send + 'static,
        U: Send + 'static,
    {
        InputChain {
            spawn: chain_stage::<I, O, U, P, F>(self.spawn, f),
            stages: self.stages + 1,
            options: self.options,
        }
    }

    /// Close the chain with a polled egress and start the pipeline.
    ///
    /// The last stage's outputs are retrieved with
    /// [`wait_get`](Pipeline::wait_get) / [`try_get`](Pipeline::try_get).
    pub fn polled(self) -> Result<Pipeline<Inlet<I, P>, Outlet<O, P>>> {
        if self.stages == 0 {
            return Err(PipelineError::NoStages);
        }
        let mut asm = Assembler::new(self.options, self.stages);
        let egress: Arc<P::Channel<O>> = Arc::new(<P::Channel<O> as Channel<O>>::new());
        let ingress = match (self.spawn)(Arc::clone(&egress), Delivery::Final, &mut asm) {
            Ok(channel) => channel,
            Err(error) => {
                asm.abort();
                return Err(error);
            }
        };
        Ok(Pipeline::assemble(
            Inlet::new(ingress),
            Outlet::new(egress),
            asm.into_core(),
        ))
    }

    /// Close the chain with a sink stage and start the pipeline.
    pub fn consume<F>(self, f: F) -> Result<Pipeline<Inlet<I, P>, Consumed>>
    where
        F: FnMut(O) + Send + 'static,
    {
        let mut asm = Assembler::new(self.options, self.stages + 1);
        let tail_input = asm.channel::<P, O>();
        if let Err(error) = spawn_consumer(&mut asm, Arc::clone(&tail_input), f) {
            asm.abort();
            return Err(error);
        }
        let ingress = match (self.spawn)(tail_input, Delivery::Forward, &mut asm) {
            Ok(channel) => channel,
            Err(error) => {
                asm.abort();
                return Err(error);
            }
        };
        Ok(Pipeline::assemble(
            Inlet::new(ingress),
            Consumed,
            asm.into_core(),
        ))
    }
}

/// A self-feeding pipeline under construction: the producer yields `H`, the
/// current chain output is `O`.
pub struct ProducerChain<F, H: Send + 'static, O: Send + 'static, P: Policy> {
    producer: F,
    spawn: Spawner<H, O, P>,
    stages: usize,
    options: BuildOptions,
}

impl<F, H, O, P> ProducerChain<F, H, O, P>
where
    F: FnMut() -> H + Send + 'static,
    H: Send + 'static,
    O: Send + 'static,
    P: Policy,
{
    /// Append a stage. It must accept the previous stage's output.
    pub fn stage<G, U>(self, g: G) -> ProducerChain<F, H, U, P>
    where
        G: FnMut(O) -> U + Send + 'static,
        U: Send + 'static,
    {
        ProducerChain {
            producer: self.producer,
            spawn: chain_stage::<H, O, U, P, G>(self.spawn, g),
            stages: self.stages + 1,
            options: self.options,
        }
    }

    /// Close the chain with a polled egress and start the pipeline.
    pub fn polled(self) -> Result<Pipeline<ProducerHead, Outlet<O, P>>> {
        let mut asm = Assembler::new(self.options, self.stages + 1);
        let egress: Arc<P::Channel<O>> = Arc::new(<P::Channel<O> as Channel<O>>::new());
        // With no stages in between, the producer delivers straight into the
        // egress and its pushes settle values immediately.
        let head_delivery = if self.stages == 0 {
            Delivery::Final
        } else {
            Delivery::Forward
        };
        let head_output = match (self.spawn)(Arc::clone(&egress), Delivery::Final, &mut asm) {
            Ok(channel) => channel,
            Err(error) => {
                asm.abort();
                return Err(error);
            }
        };
        let gate = match spawn_producer(&mut asm, head_output, self.producer, head_delivery) {
            Ok(gate) => gate,
            Err(error) => {
                asm.abort();
                return Err(error);
            }
        };
        Ok(Pipeline::assemble(
            ProducerHead::new(gate),
            Outlet::new(egress),
            asm.into_core(),
        ))
    }

    /// Close the chain with a sink stage and start the pipeline.
    pub fn consume<G>(self, g: G) -> Result<Pipeline<ProducerHead, Consumed>>
    where
        G: FnMut(O) + Send + 'static,
    {
        let mut asm = Assembler::new(self.options, self.stages + 2);
        let tail_input = asm.channel::<P, O>();
        if let Err(error) = spawn_consumer(&mut asm, Arc::clone(&tail_input), g) {
            asm.abort();
            return Err(error);
        }
        let head_output = match (self.spawn)(tail_input, Delivery::Forward, &mut asm) {
            Ok(channel) => channel,
            Err(error) => {
                asm.abort();
                return Err(error);
            }
        };
        let gate = match spawn_producer(&mut asm, head_output, self.producer, Delivery::Forward) {
            Ok(gate) => gate,
            Err(error) => {
                asm.abort();
                return Err(error);
            }
        };
        Ok(Pipeline::assemble(
            ProducerHead::new(gate),
            Consumed,
            asm.into_core(),
        ))
    }
}

/// Wrap `upstream` with one more relay stage; the new stage spawns first.
fn chain_stage<I, O, U, P, F>(upstream: Spawner<I, O, P>, f: F) -> Spawner<I, U, P>
where
    I: Send + 'static,
    O: Send + 'static,
    U: Send + 'static,
    P: Policy,
    F: FnMut(O) -> U + Send + 'static,
{
    Box::new(move |sink, delivery, asm| {
        let input = asm.channel::<P, O>();
        let worker_input = Arc::clone(&input);
        let stop = asm.stop();
        let activity = asm.activity();
        let stats = asm.stage_stats();
        asm.spawn(move || worker::relay(worker_input, sink, f, stop, activity, stats, delivery))?;
        upstream(input, Delivery::Forward, asm)
    })
}

fn spawn_consumer<T, C, F>(asm: &mut Assembler, input: Arc<C>, f: F) -> Result<()>
where
    T: Send + 'static,
    C: Channel<T>,
    F: FnMut(T) + Send + 'static,
{
    let stop = asm.stop();
    let activity = asm.activity();
    let stats = asm.stage_stats();
    asm.spawn(move || worker::consume(input, f, stop, activity, stats))
}

fn spawn_producer<H, C, F>(
    asm: &mut Assembler,
    output: Arc<C>,
    f: F,
    delivery: Delivery,
) -> Result<Arc<PauseGate>>
where
    H: Send + 'static,
    C: Channel<H>,
    F: FnMut() -> H + Send + 'static,
{
    let gate = asm.gate();
    let worker_gate = Arc::clone(&gate);
    let stop = asm.stop();
    let activity = asm.activity();
    let stats = asm.stage_stats();
    asm.spawn(move || worker::produce(output, f, stop, worker_gate, activity, stats, delivery))?;
    Ok(gate)
}

/// Accumulates the runtime state of a pipeline while its workers are being
/// spawned, and tears that state down if construction fails part-way.
struct Assembler {
    options: BuildOptions,
    stop: Arc<AtomicBool>,
    activity: Arc<Activity>,
    gate: Option<Arc<PauseGate>>,
    channels: Vec<Arc<dyn ChannelControl>>,
    stats: Vec<(usize, Arc<StageStats>)>,
    workers: Vec<(usize, thread::JoinHandle<()>)>,
    next_label: usize,
    spawned: usize,
}

impl Assembler {
    fn new(options: BuildOptions, stages: usize) -> Self {
        Self {
            options,
            stop: Arc::new(AtomicBool::new(false)),
            activity: Arc::new(Activity::new()),
            gate: None,
            channels: Vec::new(),
            stats: Vec::new(),
            workers: Vec::new(),
            next_label: stages.saturating_sub(1),
            spawned: 0,
        }
    }

    /// Create a channel and register it for the shutdown wake-up pass.
    fn channel<P: Policy, T: Send + 'static>(&mut self) -> Arc<P::Channel<T>> {
        let channel = Arc::new(<P::Channel<T> as Channel<T>>::new());
        let control = Arc::clone(&channel) as Arc<dyn ChannelControl>;
        self.channels.push(control);
        channel
    }

    fn stop(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn activity(&self) -> Arc<Activity> {
        Arc::clone(&self.activity)
    }

    fn gate(&mut self) -> Arc<PauseGate> {
        let gate = Arc::new(PauseGate::new());
        self.gate = Some(Arc::clone(&gate));
        gate
    }

    /// Counters for the stage about to be spawned.
    fn stage_stats(&mut self) -> Arc<StageStats> {
        let stats = Arc::new(StageStats::new());
        self.stats.push((self.next_label, Arc::clone(&stats)));
        stats
    }

    /// Spawn one worker thread. Stage labels count down because workers are
    /// spawned tail-first.
    fn spawn(&mut self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        let stage = self.next_label;
        self.spawned += 1;

        #[cfg(test)]
        if spawn_failures::should_fail(self.spawned) {
            return Err(PipelineError::Spawn {
                stage,
                source: std::io::Error::new(std::io::ErrorKind::WouldBlock, "injected spawn failure"),
            });
        }

        let mut builder = thread::Builder::new().name(format!("stage-{stage}"));
        if let Some(bytes) = self.options.stack_size {
            builder = builder.stack_size(bytes);
        }
        let handle = builder
            .spawn(work)
            .map_err(|source| PipelineError::Spawn { stage, source })?;
        self.workers.push((stage, handle));
        self.next_label = self.next_label.wrapping_sub(1);
        Ok(())
    }

    /// Roll back a partial build: stop, wake everything, join everything.
    fn abort(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wake();
        }
        for channel in &self.channels {
            channel.wake();
        }
        for (_, handle) in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn into_core(mut self) -> Core {
        // Stats were registered tail-first; order them head-first for the
        // handle's index-based accessors.
        self.stats.sort_by_key(|(stage, _)| *stage);
        let stats = self.stats.into_iter().map(|(_, stats)| stats).collect();
        Core::new(
            self.stop,
            self.gate,
            self.channels,
            self.activity,
            stats,
            self.workers,
        )
    }
}

/// Test-only switch that makes the nth spawn of the current thread fail.
#[cfg(test)]
pub(crate) mod spawn_failures {
    use std::cell::Cell;

    thread_local! {
        static FAIL_AT: Cell<Option<usize>> = const { Cell::new(None) };
    }

    pub(crate) fn arm(nth: usize) {
        FAIL_AT.with(|cell| cell.set(Some(nth)));
    }

    pub(crate) fn should_fail(nth: usize) -> bool {
        FAIL_AT.with(|cell| match cell.get() {
            Some(armed) if armed == nth => {
                cell.set(None);
                true
            }
            _ => false,
        })
    }
}
