use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generation-counted cancellation token shared between the benchmark
/// sampler and every operation that invalidates its results.
///
/// A sampler run calls [`issue`](Self::issue) at start and remembers the
/// returned generation; settings mutators and re-evaluation call it too,
/// which makes every older run stale. Cancellation is cooperative and
/// non-aborting: an in-flight request is never interrupted, the run simply
/// checks [`is_stale`](Self::is_stale) between round trips and discards a
/// result that lands after a newer generation was issued.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    generation: Arc<AtomicU64>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the counter and return the new generation.
    pub fn issue(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently issued generation.
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True once a newer generation than `generation` has been issued.
    pub fn is_stale(&self, generation: u64) -> bool {
        self.current() > generation
    }
}
