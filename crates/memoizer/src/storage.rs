use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use humantime_serde::re::humantime::format_duration;
use moka::ops::compute::{CompResult, Op};

use crate::fingerprint::Fingerprint;

/// How long an item stays in the [`Storage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Expiration {
    /// The item stays until it is deleted or the storage is flushed.
    Never,
    /// The item is removed once the given duration has passed since it was stored.
    ///
    /// A zero duration means [`Never`](Self::Never).
    After(Duration),
}

impl Expiration {
    fn normalized(self) -> Self {
        match self {
            Self::After(ttl) if ttl.is_zero() => Self::Never,
            other => other,
        }
    }

    /// The point in time an item stored at `now` expires, or `None` if it never does.
    fn deadline(self, now: Instant) -> Option<Instant> {
        match self.normalized() {
            Self::Never => None,
            Self::After(ttl) => now.checked_add(ttl),
        }
    }
}

impl From<Duration> for Expiration {
    fn from(ttl: Duration) -> Self {
        Self::After(ttl).normalized()
    }
}

impl From<Option<Duration>> for Expiration {
    fn from(ttl: Option<Duration>) -> Self {
        ttl.map_or(Self::Never, Self::from)
    }
}

impl fmt::Display for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normalized() {
            Self::Never => f.write_str("never"),
            Self::After(ttl) => write!(f, "{}", format_duration(ttl)),
        }
    }
}

/// An item saved in the in-memory moka cache.
///
/// Moka knows nothing about the deadline. Expired items are hidden by [`Storage::get`] and
/// removed by [`sweep_expired`].
#[derive(Clone, Debug)]
struct StoredItem<V> {
    /// When to evict this item, `None` keeps it forever.
    deadline: Option<Instant>,
    /// The actual data.
    value: V,
}

impl<V> StoredItem<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

type ItemCache<V> = moka::sync::Cache<Fingerprint, StoredItem<V>>;

/// Removes every item whose deadline has passed, and returns how many were removed.
fn sweep_expired<V>(cache: &ItemCache<V>) -> usize
where
    V: Clone + Send + Sync + 'static,
{
    let now = Instant::now();
    let mut removed = 0;

    for (key, item) in cache.iter() {
        if !item.is_expired(now) {
            continue;
        }
        // The item may have been replaced since it was visited, only remove it if it is
        // still expired.
        let result = cache.entry(*key).and_compute_with(|entry| match entry {
            Some(entry) if entry.value().is_expired(now) => Op::Remove,
            _ => Op::Nop,
        });
        if matches!(result, CompResult::Removed(_)) {
            removed += 1;
        }
    }

    cache.run_pending_tasks();
    removed
}

/// An in-memory key/value store where every item expires after some time.
///
/// Expired items are never returned from [`get`](Self::get). They are removed from memory
/// by a background thread every `cleanup_interval`, or on demand with
/// [`delete_expired`](Self::delete_expired).
///
/// `Storage` is a cheap handle, clones share the same items. The background thread stops
/// once the last clone is dropped.
pub struct Storage<V> {
    cache: ItemCache<V>,
    default_expiration: Expiration,
    janitor: Option<Arc<Janitor>>,
}

// https://github.com/rust-lang/rust/issues/26925
impl<V> Clone for Storage<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            default_expiration: self.default_expiration,
            janitor: self.janitor.clone(),
        }
    }
}

impl<V> fmt::Debug for Storage<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("default_expiration", &self.default_expiration)
            .field("items", &self.cache.entry_count())
            .field("cleanup_interval", &self.janitor.as_ref().map(|j| j.interval))
            .finish()
    }
}

impl<V> Storage<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty storage.
    ///
    /// Items stored with [`set`](Self::set) expire after `default_expiration`. Expired items
    /// are swept every `cleanup_interval`; `None` or a zero interval disables the sweep.
    pub fn new(default_expiration: Expiration, cleanup_interval: Option<Duration>) -> Self {
        let cache = ItemCache::<V>::builder().build();

        let janitor = cleanup_interval
            .filter(|interval| !interval.is_zero())
            .and_then(|interval| Janitor::start(cache.clone(), interval))
            .map(Arc::new);

        Self {
            cache,
            default_expiration: default_expiration.normalized(),
            janitor,
        }
    }

    /// The expiration applied by [`set`](Self::set).
    pub fn default_expiration(&self) -> Expiration {
        self.default_expiration
    }

    /// Stores `value` under `key` with the default expiration, replacing any previous item.
    pub fn set(&self, key: Fingerprint, value: V) {
        self.set_with_expiration(key, value, self.default_expiration)
    }

    /// Stores `value` under `key` with an explicit expiration, replacing any previous item.
    pub fn set_with_expiration(&self, key: Fingerprint, value: V, expiration: Expiration) {
        let deadline = expiration.deadline(Instant::now());
        self.cache.insert(key, StoredItem { deadline, value });
    }

    /// Returns the item stored under `key`, unless it is missing or expired.
    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let item = self.cache.get(key)?;
        if item.is_expired(Instant::now()) {
            return None;
        }
        Some(item.value)
    }

    /// Removes the item stored under `key`.
    pub fn delete(&self, key: &Fingerprint) {
        self.cache.invalidate(key);
    }

    /// Removes all items.
    pub fn flush(&self) {
        for (key, _) in self.cache.iter() {
            self.cache.invalidate(&*key);
        }
        self.cache.run_pending_tasks();
    }

    /// Removes all expired items from memory.
    ///
    /// This is what the background sweep runs every `cleanup_interval`.
    pub fn delete_expired(&self) {
        let removed = sweep_expired(&self.cache);
        if removed > 0 {
            tracing::trace!(removed, "Deleted expired items");
        }
    }

    /// Returns the number of items, after sweeping out the expired ones.
    pub fn item_count(&self) -> u64 {
        self.delete_expired();
        self.cache.entry_count()
    }
}

/// The background thread sweeping expired items out of a [`Storage`].
struct Janitor {
    interval: Duration,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Janitor {
    fn start<V>(cache: ItemCache<V>, interval: Duration) -> Option<Self>
    where
        V: Clone + Send + Sync + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("memoizer-janitor".into())
            .spawn(move || {
                tracing::debug!(interval = %format_duration(interval), "Starting storage janitor");
                // The sender is never used to send, so any message or disconnect means stop.
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    let removed = sweep_expired(&cache);
                    if removed > 0 {
                        tracing::trace!(removed, "Janitor deleted expired items");
                    }
                }
                tracing::debug!("Stopping storage janitor");
            });

        match spawned {
            Ok(handle) => Some(Self {
                interval,
                stop: Some(stop),
                handle: Some(handle),
            }),
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    "Failed to spawn storage janitor, expired items are only swept on demand",
                );
                None
            }
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            // The last handle can be dropped by the janitor itself while it evicts items.
            if handle.thread().id() != thread::current().id() {
                handle.join().ok();
            }
        }
    }
}
