//! Sample accumulator shared by the read loop and consumers

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::Sample;

/// Unbounded sample buffer with atomic drain
///
/// The read loop appends whole decoded frames; consumers drain everything
/// accumulated since their last call. Growth is bounded only by how often
/// the consumer drains.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Mutex<Vec<Sample>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append samples to the tail as one unit
    pub fn append(&self, samples: impl IntoIterator<Item = Sample>) {
        self.lock().extend(samples);
    }

    /// Remove and return everything accumulated since the previous drain
    pub fn drain(&self) -> Vec<Sample> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        // A panicking producer leaves the Vec intact; keep serving it
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
