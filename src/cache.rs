//! Probe result cache keyed by proxy fingerprint

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Cached outcome of a probe.
///
/// `latency` present means the last probe was admitted with that
/// latency; absent means the target is known bad. Absence of the whole
/// entry means the target has never been probed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
}

impl CacheEntry {
    pub fn admitted(latency: u64) -> Self {
        Self {
            latency: Some(latency),
        }
    }

    pub fn rejected() -> Self {
        Self { latency: None }
    }
}

/// Key-value store for probe outcomes. The store decides nothing about
/// eviction or persistence; callers may hand in one that outlives the
/// process.
pub trait ProbeCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn set(&self, key: &str, entry: CacheEntry);
}

/// Process-scoped in-memory cache with no eviction.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProbeCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, entry: CacheEntry) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.to_string(), entry);
    }
}
