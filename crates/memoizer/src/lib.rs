//! Memoization of function calls, with request coalescing and expiring results.
//!
//! A [`Memoizer`] turns a function into one that remembers its results. Calls are keyed by
//! a [`Fingerprint`] of their arguments, and results are kept in an expiring in-memory
//! [`Storage`] for a configurable time.
//!
//! Concurrent calls with equal arguments are coalesced, so the function runs only once, and
//! a panic of the function is raised again in every caller that shared the execution, as
//! well as in later callers until the result expires. Expiring a result is the only way to
//! run the function again for the same arguments.
//!
//! ```
//! use std::time::Duration;
//!
//! use memoizer::{Memoizer, Variadic, variadic};
//!
//! let memoizer = Memoizer::new(Duration::from_secs(90), Some(Duration::from_secs(600)));
//!
//! let square = memoizer.memoize(|x: u64| x * x);
//! assert_eq!(square(12), 144);
//!
//! let concat = memoizer.memoize(|first: String, rest: Variadic<String>| {
//!     rest.iter().fold(first, |acc, s| acc + s)
//! });
//! assert_eq!(concat("a".into(), variadic!["b".to_owned(), "c".to_owned()]), "abc");
//! assert_eq!(concat("a".into(), Variadic::new()), "a");
//! ```

#![warn(missing_docs)]

mod call;
mod config;
mod error;
mod fingerprint;
mod function;
mod memoizer;
mod storage;

pub use call::{ReplayedPanic, panic_message};
pub use config::MemoizerConfig;
pub use error::{ArgumentKind, MemoizeError};
pub use fingerprint::{Fingerprint, Variadic};
pub use function::MemoizeFn;
pub use memoizer::{Memoized, Memoizer, StoredCall};
pub use storage::{Expiration, Storage};
