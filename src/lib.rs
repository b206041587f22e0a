//! Multi-stage processing pipelines with one worker thread per stage.
//!
//! This crate chains user functions into a linear pipeline. Each stage runs
//! on its own thread and hands values to the next stage through a
//! single-producer/single-consumer channel, so a slow stage never stalls the
//! caller and independent stages overlap on separate cores.
//!
//! # Features
//!
//! - Three hand-off channels: an unbounded blocking FIFO queue, a blocking
//!   triple buffer and a lock-free triple buffer (both keep-latest-only)
//! - Caller-fed or self-feeding (producer) heads; polled or sink (consumer)
//!   tails
//! - Stage chains typed end to end: a stage that cannot accept its
//!   upstream's output is rejected at compile time
//! - Pause and resume for producer heads
//! - Exact idleness tracking: `wait_until_idle` returns once nothing is
//!   queued or being processed
//! - Clean teardown: dropping the handle stops, wakes and joins every worker
//!
//! # Example
//!
//! ```
//! use conveyor::PipelineBuilder;
//!
//! let pipeline = PipelineBuilder::new()
//!     .input::<(i32, i32)>()
//!     .stage(|(x, y): (i32, i32)| x + y)
//!     .stage(|sum: i32| sum * sum)
//!     .polled()?;
//!
//! pipeline.input((2, 3));
//! assert_eq!(pipeline.wait_get(), 25);
//! # Ok::<(), conveyor::PipelineError>(())
//! ```
//!
//! When only the freshest value matters, pick a lossy policy; stale values
//! are overwritten instead of queued:
//!
//! ```
//! use conveyor::{policy, PipelineBuilder};
//!
//! let pipeline = PipelineBuilder::new()
//!     .policy(policy::TripleBuffer)
//!     .input::<u64>()
//!     .stage(|sample: u64| sample * 2)
//!     .polled()?;
//!
//! for sample in 0..1000 {
//!     pipeline.input(sample);
//! }
//! pipeline.wait_until_idle();
//! assert!(pipeline.try_get().is_some());
//! assert!(pipeline.try_get().is_none());
//! # Ok::<(), conveyor::PipelineError>(())
//! ```

mod activity;
pub mod builder;
pub mod channel;
pub mod error;
pub mod lock_free;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod queue;
pub mod triple_buffer;
mod worker;

// Re-exports for convenience
pub use builder::{InputChain, PipelineBuilder, ProducerChain};
pub use channel::{Channel, ChannelControl};
pub use error::{PipelineError, Result};
pub use lock_free::LockFreeTripleBuffer;
pub use metrics::{StageStats, StatsSnapshot};
pub use pipeline::{Consumed, Inlet, Outlet, Pipeline, ProducerHead};
pub use policy::Policy;
pub use queue::BlockingQueue;
pub use triple_buffer::BlockingTripleBuffer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
