use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use memoizer::Memoizer;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// Number of distinct arguments the calls are spread over.
    pub keys: u64,
    /// How long one execution of the memoized function takes.
    #[serde(with = "humantime_serde")]
    pub work: Duration,
    /// Every n-th execution panics.
    #[serde(default)]
    pub panic_every: Option<usize>,
}

type WorkFn = Arc<dyn Fn(u64) -> u64 + Send + Sync>;

/// A workload with its memoized function, ready to be called.
pub struct PreparedWorkload {
    /// Number of calls in flight, between 1 and `u32::MAX`.
    pub concurrency: u32,
    keys: u64,
    function: WorkFn,
    executions: Arc<AtomicUsize>,
}

impl PreparedWorkload {
    pub fn new(memoizer: &Memoizer, workload: Workload) -> Self {
        let Workload {
            concurrency,
            keys,
            work,
            panic_every,
        } = workload;

        let executions = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&executions);
        let function = memoizer.memoize(move |key: u64| {
            let execution = counted.fetch_add(1, Ordering::Relaxed) + 1;
            std::thread::sleep(work);

            if panic_every.is_some_and(|n| n > 0 && execution % n == 0) {
                panic::panic_any(execution);
            }
            key.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        });

        Self {
            concurrency: u32::try_from(concurrency).unwrap_or(u32::MAX).max(1),
            keys: keys.max(1),
            function,
            executions,
        }
    }

    /// Calls the memoized function with a random key, returning `false` if it panicked.
    pub fn call_random(&self) -> bool {
        let key = rand::rng().random_range(0..self.keys);
        panic::catch_unwind(AssertUnwindSafe(|| (self.function)(key))).is_ok()
    }

    /// How often the memoized function actually ran.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }
}
