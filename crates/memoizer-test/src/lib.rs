//! Helpers for testing memoized functions.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Memoized functions are usually `'static` closures. Use a [`Counter`] to observe how
//!    often the wrapped function really ran, and clone it into the closure.
//!
//!  - Panics of memoized functions are part of their observable behavior. Use
//!    [`expect_panic`] to get the payload a call panicked with.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use memoizer::panic_message;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memoizer` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoizer=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A shared counter of function executions.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter and returns the new count.
    pub fn incr(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The current count.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs `f` and returns the payload it panicked with, or the value it returned.
pub fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, Box<dyn Any + Send>> {
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Runs `f`, which is expected to panic with a payload of type `T`, and returns that payload.
///
/// # Panics
///
/// Panics if `f` returns normally, or if it panics with a payload of a different type.
pub fn expect_panic<T, R>(f: impl FnOnce() -> R) -> T
where
    T: Any + Clone,
{
    match catch_panic(f) {
        Ok(_) => panic!("expected a panic with a `{}` payload", std::any::type_name::<T>()),
        Err(payload) => match payload.downcast_ref::<T>() {
            Some(payload) => payload.clone(),
            None => panic!(
                "expected a panic with a `{}` payload, got {}",
                std::any::type_name::<T>(),
                panic_message(&*payload),
            ),
        },
    }
}
