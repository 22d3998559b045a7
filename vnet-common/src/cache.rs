use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::trace;

/// A string key/value cache where every entry carries an expiration.
///
/// Connection tracking stores its decisions here. Implementations must be safe to share
/// between the simulation workers.
pub trait Cache: Send + Sync {
    /// Stores `value` under `key` using the cache's default expiration.
    fn set(&self, key: &str, value: &str);

    /// Stores `value` under `key`, expiring after `ttl`.
    fn set_with_expiration(&self, key: &str, value: &str, ttl: Duration);

    /// Returns the live value for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Returns the live value for `key` and pushes its expiration forward by the default
    /// expiration.
    fn get_and_touch(&self, key: &str) -> Option<String>;

    /// The default expiration applied by [`Cache::set`] and [`Cache::get_and_touch`].
    fn expiration(&self) -> Duration;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`Cache`] backed by a mutex-guarded hash map. Expired entries are dropped
/// lazily on access, or in bulk with [`MemoryCache::purge_expired`].
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<String, Entry>>,
    expiration: Duration,
}

impl MemoryCache {
    pub fn new(expiration: Duration) -> Self {
        Self { entries: Mutex::new(FxHashMap::default()), expiration }
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            trace!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str, touch: bool) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                if touch {
                    entry.expires_at = now + self.expiration;
                }
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

impl Cache for MemoryCache {
    fn set(&self, key: &str, value: &str) {
        self.set_with_expiration(key, value, self.expiration);
    }

    fn set_with_expiration(&self, key: &str, value: &str, ttl: Duration) {
        let entry = Entry { value: value.to_owned(), expires_at: Instant::now() + ttl };
        self.entries.lock().insert(key.to_owned(), entry);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.lookup(key, false)
    }

    fn get_and_touch(&self, key: &str) -> Option<String> {
        self.lookup(key, true)
    }

    fn expiration(&self) -> Duration {
        self.expiration
    }
}
