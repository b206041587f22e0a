//! Channel policy selection.
//!
//! A policy picks the channel variant used for the ingress, every internal
//! edge and the egress of a pipeline. The variants share the
//! [`Channel`] contract but no implementation; selection happens at build
//! time through the type system, so a pipeline pays only for the variant it
//! chose.

use crate::channel::Channel;
use crate::queue::BlockingQueue;
use crate::triple_buffer::BlockingTripleBuffer;

/// Maps element types to a concrete channel implementation.
pub trait Policy: Send + Sync + 'static {
    /// The channel used for every edge of a pipeline built with this policy.
    type Channel<T: Send + 'static>: Channel<T>;
}

/// Unbounded FIFO hand-off (the default).
///
/// Nothing is ever dropped; a slow stage makes its input queue grow.
#[derive(Debug, Clone, Copy, Default)]
pub struct Queue;

impl Policy for Queue {
    type Channel<T: Send + 'static> = BlockingQueue<T>;
}

/// Keep-latest-only hand-off with a sleeping reader.
///
/// Prefer this when stages produce faster than downstream can consume and
/// only the most recent value matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripleBuffer;

impl Policy for TripleBuffer {
    type Channel<T: Send + 'static> = BlockingTripleBuffer<T>;
}

/// Keep-latest-only hand-off with a spinning reader and no mutex.
///
/// Same loss semantics as [`TripleBuffer`] with lower hand-off latency;
/// readers burn CPU while waiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockFreeTripleBuffer;

impl Policy for LockFreeTripleBuffer {
    type Channel<T: Send + 'static> = crate::lock_free::LockFreeTripleBuffer<T>;
}
