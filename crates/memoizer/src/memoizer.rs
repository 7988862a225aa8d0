use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::call::{Failure, PendingCall};
use crate::config::MemoizerConfig;
use crate::error::MemoizeError;
use crate::fingerprint::Fingerprint;
use crate::function::MemoizeFn;
use crate::storage::{Expiration, Storage};

/// A type-erased call record, as kept in the [`Storage`] of a [`Memoizer`].
pub type StoredCall = Arc<dyn Any + Send + Sync>;

struct MemoizerInner {
    storage: Storage<StoredCall>,
    /// Serializes the "look up, and install a pending call if missing" step.
    decision: Mutex<()>,
    next_scope: AtomicU64,
}

/// Creates memoized versions of functions, sharing one expiring [`Storage`].
///
/// Every function memoized with [`memoize`](Self::memoize) or [`wrap`](Self::wrap) runs at
/// most once per distinct set of arguments while its result is stored. Concurrent calls with
/// equal arguments are coalesced: one caller runs the function, and all the others block
/// until it is done and then get a copy of its result. If the function panics, all of these
/// callers panic with the same payload, as do later callers until the entry expires.
///
/// `Memoizer` is a cheap handle, clones share the same storage.
#[derive(Clone)]
pub struct Memoizer {
    inner: Arc<MemoizerInner>,
}

impl fmt::Debug for Memoizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("storage", &self.inner.storage)
            .field("functions", &self.inner.next_scope.load(Ordering::Relaxed))
            .finish()
    }
}

impl Memoizer {
    /// Creates a new memoizer.
    ///
    /// Results expire `default_expiration` after they were computed, use
    /// [`Expiration::Never`] to keep them forever. Expired results are removed from memory
    /// every `cleanup_interval`; with `None` they are only dropped when they are replaced.
    pub fn new(
        default_expiration: impl Into<Expiration>,
        cleanup_interval: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(MemoizerInner {
                storage: Storage::new(default_expiration.into(), cleanup_interval),
                decision: Mutex::new(()),
                next_scope: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a new memoizer from its configuration.
    pub fn from_config(config: &MemoizerConfig) -> Self {
        Self::new(config.default_expiration, config.cleanup_interval)
    }

    /// The storage holding the memoized results, for inspection or to [`flush`](Storage::flush) it.
    pub fn storage(&self) -> &Storage<StoredCall> {
        &self.inner.storage
    }

    /// Memoizes a function, keeping its signature.
    ///
    /// This works for functions and closures of up to 8 arguments. All arguments must be
    /// [`Serialize`], and the return value has to be [`Clone`] as every caller gets its own
    /// copy. A variadic function takes a [`Variadic`](crate::Variadic) as its last argument.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use memoizer::Memoizer;
    ///
    /// let memoizer = Memoizer::new(Duration::from_secs(90), None);
    /// let area = memoizer.memoize(|w: u32, h: u32| w * h);
    ///
    /// assert_eq!(area(3, 4), 12);
    /// assert_eq!(area(3, 4), 12);
    /// ```
    ///
    /// # Panics
    ///
    /// Calling the memoized function panics with a [`MemoizeError`] payload if the arguments
    /// can not be turned into a [`Fingerprint`]. Use [`wrap`](Self::wrap) and
    /// [`Memoized::try_call`] to get this error as a value.
    pub fn memoize<F, Args>(&self, f: F) -> F::Memoized
    where
        F: MemoizeFn<Args>,
    {
        f.memoize_with(self)
    }

    /// Memoizes a function taking all of its arguments as one value, usually a tuple.
    pub fn wrap<Args, R, F>(&self, f: F) -> Memoized<Args, R>
    where
        F: Fn(Args) -> R + Send + Sync + 'static,
        Args: Serialize + 'static,
        R: Clone + Send + Sync + 'static,
    {
        Memoized {
            memoizer: self.clone(),
            scope: self.inner.next_scope.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(f),
        }
    }
}

enum Role<R> {
    /// This caller runs the function and publishes its outcome.
    Executor(Arc<PendingCall<R>>),
    /// Another caller runs, or already ran, the function.
    Waiter(Arc<PendingCall<R>>),
}

/// A memoized function, created by [`Memoizer::wrap`].
pub struct Memoized<Args, R> {
    memoizer: Memoizer,
    /// Keeps the fingerprints of different functions on the same [`Memoizer`] apart.
    scope: u64,
    func: Arc<dyn Fn(Args) -> R + Send + Sync>,
}

// https://github.com/rust-lang/rust/issues/26925
impl<Args, R> Clone for Memoized<Args, R> {
    fn clone(&self) -> Self {
        Self {
            memoizer: self.memoizer.clone(),
            scope: self.scope,
            func: Arc::clone(&self.func),
        }
    }
}

impl<Args, R> fmt::Debug for Memoized<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<Args, R> Memoized<Args, R>
where
    Args: Serialize,
    R: Clone + Send + Sync + 'static,
{
    /// The fingerprint a call with `args` is stored under.
    pub fn fingerprint(&self, args: &Args) -> Result<Fingerprint, MemoizeError> {
        Fingerprint::derive_scoped(self.scope, args)
    }

    /// Calls the memoized function.
    ///
    /// This fails only if the arguments can not be turned into a [`Fingerprint`], in which
    /// case the function is not called and nothing is stored. A panic of the function
    /// itself is not caught: it unwinds through this call with the original payload, and
    /// every other caller sharing the execution panics with a copy of it (see
    /// [`ReplayedPanic`](crate::ReplayedPanic)).
    pub fn try_call(&self, args: Args) -> Result<R, MemoizeError> {
        let fingerprint = self.fingerprint(&args)?;

        match self.claim(fingerprint) {
            Role::Executor(call) => Ok(self.execute(fingerprint, &call, args)),
            Role::Waiter(call) => match call.wait() {
                Ok(value) => Ok(value),
                Err(failure) => failure.resume(),
            },
        }
    }

    /// Calls the memoized function, panicking with a [`MemoizeError`] payload if the
    /// arguments are not supported.
    pub fn call(&self, args: Args) -> R {
        match self.try_call(args) {
            Ok(value) => value,
            Err(err) => panic::panic_any(err),
        }
    }

    /// Decides whether this caller executes the function or waits for another one.
    ///
    /// The decision lock is only held for the lookup and the insert, never while the
    /// function runs or while waiting for it.
    fn claim(&self, fingerprint: Fingerprint) -> Role<R> {
        let inner = &self.memoizer.inner;
        let _decision = inner.decision.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = inner
            .storage
            .get(&fingerprint)
            .and_then(|stored| stored.downcast::<PendingCall<R>>().ok());
        if let Some(call) = existing {
            tracing::trace!(%fingerprint, completed = call.is_completed(), "Memoized call hit");
            return Role::Waiter(call);
        }

        tracing::trace!(%fingerprint, "Memoized call miss");
        let call = Arc::new(PendingCall::new());
        inner
            .storage
            .set(fingerprint, Arc::clone(&call) as StoredCall);
        Role::Executor(call)
    }

    fn execute(&self, fingerprint: Fingerprint, call: &PendingCall<R>, args: Args) -> R {
        // Cloning the result may panic too, and must complete the call like any other failure.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let value = (self.func)(args);
            let stored = value.clone();
            (value, stored)
        }));

        match outcome {
            Ok((value, stored)) => {
                call.complete(Ok(stored));
                value
            }
            Err(payload) => {
                let failure = Failure::capture(&*payload);
                tracing::debug!(%fingerprint, panic = failure.message(), "Memoized call panicked");
                call.complete(Err(failure));
                panic::resume_unwind(payload)
            }
        }
    }
}
