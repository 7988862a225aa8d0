use std::fmt;

use thiserror::Error;

/// The kind of argument value that could not be reduced to a [`Fingerprint`](crate::Fingerprint).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentKind {
    /// A dynamically sized sequence, like a `Vec`, a slice or a set.
    ///
    /// Trailing arguments of a variadic function are passed as a
    /// [`Variadic`](crate::Variadic) instead, which is accepted.
    Sequence,
    /// A map of any kind.
    Map,
    /// A raw byte buffer.
    Bytes,
    /// A `Serialize` implementation reported its own error.
    Other(String),
}

impl fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence => f.write_str("dynamic sequence"),
            Self::Map => f.write_str("map"),
            Self::Bytes => f.write_str("byte buffer"),
            Self::Other(details) => write!(f, "{details}"),
        }
    }
}

/// The only error raised by the memoizer itself.
///
/// Panics of the memoized function are never converted into a [`MemoizeError`], they
/// unwind through the memoized call unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoizeError {
    /// An argument cannot be turned into a stable cache key.
    ///
    /// This is raised before the cache is consulted, and is never cached.
    #[error("unsupported argument kind: {0}")]
    UnsupportedArgumentKind(ArgumentKind),
}

impl serde::ser::Error for MemoizeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::UnsupportedArgumentKind(ArgumentKind::Other(msg.to_string()))
    }
}
