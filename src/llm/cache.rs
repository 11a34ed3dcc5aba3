use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Storage for generated text keyed by prompt.
pub trait ResponseStore: Send + Sync {
    fn get(&self, prompt: &str, system_prompt: Option<&str>) -> Option<String>;
    fn set(&self, prompt: &str, response: &str, system_prompt: Option<&str>);
    fn clear(&self);
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStatistics {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}

#[derive(Debug)]
struct CacheEntry {
    response: String,
    stored_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// In-memory LRU cache with per-entry expiry.
#[derive(Debug)]
pub struct ResponseCache {
    max_size: usize,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        ResponseCache {
            max_size: max_size.max(1),
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// SHA-256 over `system|||prompt`, hex encoded.
    pub fn cache_key(prompt: &str, system_prompt: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(system_prompt.unwrap_or(""));
        hasher.update("|||");
        hasher.update(prompt);
        format!("{:x}", hasher.finalize())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn remove_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        before - state.entries.len()
    }

    pub fn statistics(&self) -> CacheStatistics {
        let state = self.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total > 0 {
            state.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStatistics {
            size: state.entries.len(),
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        ResponseCache::new(1000, Duration::from_secs(3600))
    }
}

impl ResponseStore for ResponseCache {
    fn get(&self, prompt: &str, system_prompt: Option<&str>) -> Option<String> {
        let key = Self::cache_key(prompt, system_prompt);
        let ttl = self.ttl;
        let mut state = self.lock();
        let now = state.tick();

        match state.entries.get(&key).map(|entry| entry.stored_at.elapsed() > ttl) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(true) => {
                state.entries.remove(&key);
                state.misses += 1;
                return None;
            }
            Some(false) => {}
        }

        state.hits += 1;
        let entry = state.entries.get_mut(&key)?;
        entry.last_used = now;
        Some(entry.response.clone())
    }

    fn set(&self, prompt: &str, response: &str, system_prompt: Option<&str>) {
        let key = Self::cache_key(prompt, system_prompt);
        let mut state = self.lock();
        let now = state.tick();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            state.evict_least_recent();
        }
        state.entries.insert(
            key,
            CacheEntry {
                response: response.to_string(),
                stored_at: Instant::now(),
                last_used: now,
            },
        );
    }

    /// Also resets the hit and miss counters.
    fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_system_prompt_is_part_of_key() {
        let cache = ResponseCache::default();
        cache.set("describe", "plain", None);
        cache.set("describe", "expert", Some("You are an expert"));

        assert_eq!(cache.get("describe", None).as_deref(), Some("plain"));
        assert_eq!(cache.get("describe", Some("You are an expert")).as_deref(), Some("expert"));
        assert_ne!(
            ResponseCache::cache_key("a", None),
            ResponseCache::cache_key("a", Some("s"))
        );
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", "1", None);
        cache.set("b", "2", None);
        assert!(cache.get("a", None).is_some());
        cache.set("c", "3", None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b", None).is_none());
        assert!(cache.get("a", None).is_some());
        assert!(cache.get("c", None).is_some());
    }

    #[test]
    fn test_updating_existing_key_does_not_evict() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", "1", None);
        cache.set("b", "2", None);
        cache.set("a", "updated", None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", None).as_deref(), Some("updated"));
    }

    #[test]
    fn test_expiry() {
        let cache = ResponseCache::new(10, Duration::from_millis(5));
        cache.set("a", "1", None);
        cache.set("b", "2", None);
        thread::sleep(Duration::from_millis(20));

        assert!(cache.get("a", None).is_none());
        assert_eq!(cache.remove_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_statistics_and_clear() {
        let cache = ResponseCache::default();
        cache.set("a", "1", None);
        cache.get("a", None);
        cache.get("missing", None);

        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);

        cache.clear();
        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
    }
}
