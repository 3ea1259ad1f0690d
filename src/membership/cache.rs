//! Lazily initialised, TTL refreshed reference cache.

use log::debug;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key accepted by a [`RefCache`] front end.
pub trait CacheKey: Send + Sync {
    /// Identity of the slot this key addresses.
    fn string(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

struct Slot<V> {
    entry: Mutex<Option<CachedValue<V>>>,
}

struct CachedValue<V> {
    value: V,
    refreshed_at: Instant,
}

/// Values are computed on first access and recomputed on the first access
/// after `ttl`. Slots are never removed, only superseded.
///
/// The slot lock is held while the initializer runs, so concurrent callers
/// for the same key wait for the in-flight value instead of computing their
/// own.
pub struct RefCache<V> {
    ttl: Duration,
    slots: Mutex<HashMap<String, Arc<Slot<V>>>>,
}

impl<V: Clone> RefCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value for `key`, running `init` when the slot is
    /// empty or stale. Failures belong in `V`; a value is always stored.
    pub fn get_or_init<F>(&self, key: &str, init: F) -> V
    where
        F: FnOnce() -> V,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        entry: Mutex::new(None),
                    })
                })
                .clone()
        };

        let mut entry = slot.entry.lock();
        let now = Instant::now();
        if let Some(cached) = entry.as_ref() {
            if now.saturating_duration_since(cached.refreshed_at) < self.ttl {
                return cached.value.clone();
            }
            debug!("event=ref_cache_refresh key={}", key);
        }
        let value = init();
        *entry = Some(CachedValue {
            value: value.clone(),
            refreshed_at: Instant::now(),
        });
        value
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn concurrent_callers_share_one_initialisation() {
        let cache = RefCache::<Arc<usize>>::new(Duration::from_secs(60));
        let inits = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let value = cache.get_or_init("mychannel", || {
                        std::thread::sleep(Duration::from_millis(20));
                        Arc::new(inits.fetch_add(1, Ordering::SeqCst))
                    });
                    assert_eq!(*value, 0);
                });
            }
        });
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stale_entries_are_recomputed() {
        let cache = RefCache::<u32>::new(Duration::from_millis(10));
        assert_eq!(cache.get_or_init("ch", || 1), 1);
        assert_eq!(cache.get_or_init("ch", || 2), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get_or_init("ch", || 3), 3);
    }

    #[test]
    fn error_values_are_cached_until_stale() {
        let cache = RefCache::<Result<u32, &str>>::new(Duration::from_millis(10));
        assert_eq!(cache.get_or_init("ch", || Err("boom")), Err("boom"));
        assert_eq!(cache.get_or_init("ch", || Ok(1)), Err("boom"));
        assert_eq!(cache.get_or_init("other", || Ok(5)), Ok(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get_or_init("ch", || Ok(1)), Ok(1));
        assert_eq!(cache.len(), 2);
    }
}
