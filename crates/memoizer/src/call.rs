use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::error::MemoizeError;

/// What a single execution of a memoized function produced.
pub(crate) type Outcome<R> = Result<R, Failure>;

type Replay = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// The panic payload raised to waiting callers when the original payload cannot be cloned.
///
/// The caller executing the memoized function always sees the original payload. Callers
/// waiting on that execution get an equal copy of it if it is a string, a primitive or a
/// [`MemoizeError`], and a `ReplayedPanic` carrying the panic message otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedPanic {
    message: String,
}

impl ReplayedPanic {
    /// The message of the original panic, if it had one.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ReplayedPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memoized call panicked: {}", self.message)
    }
}

/// Extracts a human readable message from a panic payload.
///
/// This understands string payloads, as raised by `panic!`, and [`ReplayedPanic`]s. Any
/// other payload gives `"Box<dyn Any>"`.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(replayed) = payload.downcast_ref::<ReplayedPanic>() {
        replayed.message()
    } else {
        "Box<dyn Any>"
    }
}

fn replay_clone(payload: &(dyn Any + Send)) -> Option<Replay> {
    macro_rules! replay_as {
        ($($ty:ty),* $(,)?) => {
            $(
                if let Some(value) = payload.downcast_ref::<$ty>() {
                    let value = value.clone();
                    return Some(Arc::new(move || Box::new(value.clone()) as Box<dyn Any + Send>));
                }
            )*
        };
    }

    replay_as!(
        &'static str,
        String,
        bool,
        char,
        i8,
        i16,
        i32,
        i64,
        i128,
        isize,
        u8,
        u16,
        u32,
        u64,
        u128,
        usize,
        f32,
        f64,
        MemoizeError,
        ReplayedPanic,
    );
    None
}

/// A captured panic of a memoized function that can be raised any number of times.
#[derive(Clone)]
pub(crate) struct Failure {
    message: Arc<str>,
    replay: Replay,
}

impl Failure {
    /// Captures the given panic payload.
    pub fn capture(payload: &(dyn Any + Send)) -> Self {
        let message: Arc<str> = panic_message(payload).into();
        let replay = replay_clone(payload).unwrap_or_else(|| {
            let replayed = ReplayedPanic {
                message: message.to_string(),
            };
            Arc::new(move || Box::new(replayed.clone()) as Box<dyn Any + Send>)
        });

        Self { message, replay }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creates a fresh copy of the captured payload.
    pub fn payload(&self) -> Box<dyn Any + Send> {
        (self.replay)()
    }

    /// Raises the captured panic in the current thread.
    pub fn resume(&self) -> ! {
        panic::resume_unwind(self.payload())
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// A single in-flight or completed execution of a memoized function.
///
/// The executor calls [`complete`](Self::complete) exactly once. Every caller blocked in
/// [`wait`](Self::wait) is woken up at that point, and later callers return right away.
pub(crate) struct PendingCall<R> {
    outcome: Mutex<Option<Outcome<R>>>,
    completed: Condvar,
}

impl<R: Clone> PendingCall<R> {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            completed: Condvar::new(),
        }
    }

    /// Publishes the outcome and wakes up all waiters.
    pub fn complete(&self, outcome: Outcome<R>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(slot.is_none(), "memoized call completed twice");
        *slot = Some(outcome);
        drop(slot);

        self.completed.notify_all();
    }

    /// Blocks until the call is completed and returns a copy of its outcome.
    pub fn wait(&self) -> Outcome<R> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .completed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
