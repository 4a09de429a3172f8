//! Time-to-live cache for index lookups

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cached value with its absolute expiration
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

type Entries<V> = Arc<Mutex<FxHashMap<String, CacheEntry<V>>>>;

/// Handle on the background sweeper thread
struct Sweeper {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Keyed store whose entries expire a fixed TTL after insertion.
///
/// Reads treat expired entries as absent without removing them; a background
/// sweeper purges them every TTL interval. A TTL of zero disables both the
/// sweeper and expiry, so entries stay until deleted or cleared.
pub struct Cache<V> {
    entries: Entries<V>,
    ttl: Duration,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<V: Clone + Send + 'static> Cache<V> {
    /// Create a cache and start its sweeper
    pub fn new(ttl: Duration) -> Self {
        let entries: Entries<V> = Arc::new(Mutex::new(FxHashMap::default()));

        let sweeper = if ttl.is_zero() {
            None
        } else {
            Some(spawn_sweeper(Arc::clone(&entries), ttl))
        };

        Self {
            entries,
            ttl,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Store a value, replacing any previous entry for the key
    pub fn set(&self, key: impl Into<String>, value: V) {
        let expires_at = if self.ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + self.ttl)
        };
        self.entries
            .lock()
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Get a live value
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remove every expired entry now
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    /// Stop the background sweeper. Further calls do nothing.
    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            // The thread may already have exited if the channel closed.
            let _ = sweeper.stop_tx.send(());
            let _ = sweeper.handle.join();
        }
    }
}

impl<V> Drop for Cache<V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            let _ = sweeper.stop_tx.send(());
            let _ = sweeper.handle.join();
        }
    }
}

fn purge<V>(entries: &Mutex<FxHashMap<String, CacheEntry<V>>>) -> usize {
    let now = Instant::now();
    let mut entries = entries.lock();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

fn spawn_sweeper<V: Send + 'static>(entries: Entries<V>, interval: Duration) -> Sweeper {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let handle = std::thread::spawn(move || loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let evicted = purge(&entries);
                if evicted > 0 {
                    debug!("Evicted {} expired cache entries", evicted);
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    });
    Sweeper { stop_tx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache = Cache::new(Duration::from_millis(50));
        cache.stop();
        cache.set("k", 1u32);
        std::thread::sleep(Duration::from_millis(80));

        assert_eq!(cache.get("k"), None);
        // Lazy expiry leaves the entry in place until a sweep.
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_background_sweep() {
        let cache = Cache::new(Duration::from_millis(30));
        cache.set("a", 1u8);
        cache.set("b", 2u8);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let cache = Cache::new(Duration::ZERO);
        cache.set("k", 7i64);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("k"), Some(7));
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.delete("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.size(), 1);
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_stop_twice() {
        let cache: Cache<u8> = Cache::new(Duration::from_secs(1));
        cache.stop();
        cache.stop();
    }
}
