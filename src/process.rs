//! Per-buffer processing callback
//!
//! The audio payload is supplied from outside the crate. The dispatcher
//! dequeues a buffer on every process notification, passes it to the
//! installed [`ProcessHandler`] and queues it back.

use crate::server::Direction;

/// Which device a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessContext {
    pub slot: usize,
    pub direction: Direction,
    pub channels: u16,
}

/// Fills or consumes one interleaved buffer
pub trait ProcessHandler: Send + Sync {
    fn process(&self, ctx: &ProcessContext, samples: &mut [f32]);
}

/// Writes silence
#[derive(Debug, Clone, Copy, Default)]
pub struct Silence;

impl ProcessHandler for Silence {
    fn process(&self, _ctx: &ProcessContext, samples: &mut [f32]) {
        samples.fill(0.0);
    }
}
