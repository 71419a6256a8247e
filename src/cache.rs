use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::scoring::ScoreResult;

pub const SCORE_SCOPE: &str = "player_score";

/// Read-through key: `scope:version:identifier`.
pub fn cache_key(scope: &str, version: u64, identifier: impl std::fmt::Display) -> String {
    format!("{scope}:{version}:{identifier}")
}

pub fn score_key(player_id: u32, data_version: u64) -> String {
    cache_key(SCORE_SCOPE, data_version, player_id)
}

struct Slot<V> {
    value: Option<V>,
    fetched_at: Option<Instant>,
}

/// In-process TTL cache. Concurrent misses on one key run `compute` once;
/// the other callers wait on the key's slot and reuse the result.
pub struct TtlCache<V> {
    ttl: Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot<V>>>>>,
    computations: AtomicUsize,
}

pub type ScoreCache = TtlCache<ScoreResult>;

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            computations: AtomicUsize::new(0),
        }
    }

    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let slot = {
            let mut guard = self.slots.lock().expect("cache lock poisoned");
            guard
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Slot {
                        value: None,
                        fetched_at: None,
                    }))
                })
                .clone()
        };

        let mut entry = slot.lock().expect("cache slot lock poisoned");
        if let (Some(v), Some(at)) = (entry.value.as_ref(), entry.fetched_at)
            && at.elapsed() < self.ttl
        {
            return Ok(v.clone());
        }
        self.computations.fetch_add(1, Ordering::Relaxed);
        // Errors are returned but never stored.
        let value = compute()?;
        entry.value = Some(value.clone());
        entry.fetched_at = Some(Instant::now());
        Ok(value)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let slot = {
            let guard = self.slots.lock().expect("cache lock poisoned");
            guard.get(key)?.clone()
        };
        let entry = slot.lock().expect("cache slot lock poisoned");
        match (entry.value.as_ref(), entry.fetched_at) {
            (Some(v), Some(at)) if at.elapsed() < self.ttl => Some(v.clone()),
            _ => None,
        }
    }

    /// Drop expired and never-filled slots. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut guard = self.slots.lock().expect("cache lock poisoned");
        let before = guard.len();
        guard.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => entry.fetched_at.is_some_and(|at| at.elapsed() < self.ttl),
            // Busy slots are being filled right now.
            Err(_) => true,
        });
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `compute` actually ran.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn key_format() {
        assert_eq!(score_key(42, 7), "player_score:7:42");
        assert_eq!(cache_key("fixtures", 3, "ars"), "fixtures:3:ars");
    }

    #[test]
    fn hit_skips_compute() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_compute("a", || Ok(1)).unwrap(), 1);
        assert_eq!(cache.get_or_compute("a", || Ok(2)).unwrap(), 1);
        assert_eq!(cache.computations(), 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn expired_entries_recompute() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::ZERO);
        cache.get_or_compute("a", || Ok(1)).unwrap();
        assert_eq!(cache.get_or_compute("a", || Ok(2)).unwrap(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn errors_are_not_cached() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let err = cache.get_or_compute("a", || Err(EngineError::insufficient_data(1, "none")));
        assert!(err.is_err());
        assert_eq!(cache.get_or_compute("a", || Ok(5)).unwrap(), 5);
    }
}
