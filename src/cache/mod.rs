//! Expiring key/value cache with named partitions.
//!
//! Values are stored serialized so each partition can account for its byte
//! size. Expired entries are evicted lazily on lookup; there is no
//! background sweep. The cache is an optimization only: serialization
//! failures, corrupt entries and a poisoned lock all degrade to a miss.

mod rate_limit;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::utils::clock::Clock;

pub use rate_limit::{RATE_LIMIT_PARTITION, RateLimiter};

/// Partition used when the caller does not name one.
pub const DEFAULT_PARTITION: &str = "default";

/// Size and freshness metadata for a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionInfo {
    pub size_bytes: usize,
    pub entry_count: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    payload: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Partition {
    entries: HashMap<String, Entry>,
    size_bytes: usize,
    last_updated: DateTime<Utc>,
}

impl Partition {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            entries: HashMap::new(),
            size_bytes: 0,
            last_updated: now,
        }
    }

    fn remove(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.size_bytes = self.size_bytes.saturating_sub(entry.payload.len());
                self.last_updated = now;
                true
            }
            None => false,
        }
    }
}

/// Thread-safe TTL cache.
pub struct TtlCache {
    partitions: Mutex<HashMap<String, Partition>>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Internal entry key: `<partition>:<key>`.
    fn entry_key(partition: &str, key: &str) -> String {
        format!("{partition}:{key}")
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<String, Partition>>> {
        match self.partitions.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                log::warn!("Cache lock poisoned; treating as miss");
                None
            }
        }
    }

    /// Store `value` for `ttl_minutes`.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_minutes: i64,
        partition: Option<&str>,
    ) {
        self.set_for(key, value, Duration::minutes(ttl_minutes), partition);
    }

    /// Store `value` for an arbitrary duration.
    pub fn set_for<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        partition: Option<&str>,
    ) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Cache set skipped for '{}': {}", key, e);
                return;
            }
        };
        let Some(mut partitions) = self.lock() else {
            return;
        };

        let now = self.clock.now();
        let partition_name = partition.unwrap_or(DEFAULT_PARTITION);
        let part = partitions
            .entry(partition_name.to_string())
            .or_insert_with(|| Partition::new(now));

        let new_size = payload.len();
        let entry = Entry {
            payload,
            expires_at: now + ttl,
        };
        let old_size = part
            .entries
            .insert(Self::entry_key(partition_name, key), entry)
            .map(|old| old.payload.len())
            .unwrap_or(0);

        part.size_bytes = part.size_bytes.saturating_sub(old_size) + new_size;
        part.last_updated = now;
    }

    /// Fetch a live value, evicting it if expired or unreadable.
    pub fn get<T: DeserializeOwned>(&self, key: &str, partition: Option<&str>) -> Option<T> {
        let mut partitions = self.lock()?;
        let now = self.clock.now();
        let partition_name = partition.unwrap_or(DEFAULT_PARTITION);
        let part = partitions.get_mut(partition_name)?;
        let entry_key = Self::entry_key(partition_name, key);

        let entry = part.entries.get(&entry_key)?;
        if now > entry.expires_at {
            part.remove(&entry_key, now);
            return None;
        }

        let parsed: serde_json::Result<T> = serde_json::from_str(&entry.payload);
        match parsed {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Evicting corrupt cache entry '{}': {}", entry_key, e);
                part.remove(&entry_key, now);
                None
            }
        }
    }

    /// Remove a single entry.
    pub fn remove(&self, key: &str, partition: Option<&str>) -> bool {
        let Some(mut partitions) = self.lock() else {
            return false;
        };
        let now = self.clock.now();
        let partition_name = partition.unwrap_or(DEFAULT_PARTITION);
        partitions
            .get_mut(partition_name)
            .map(|part| part.remove(&Self::entry_key(partition_name, key), now))
            .unwrap_or(false)
    }

    /// Evict every entry whose key starts with `prefix`.
    pub fn clear_by_prefix(&self, prefix: &str, partition: Option<&str>) -> usize {
        let Some(mut partitions) = self.lock() else {
            return 0;
        };
        let now = self.clock.now();
        let partition_name = partition.unwrap_or(DEFAULT_PARTITION);
        let Some(part) = partitions.get_mut(partition_name) else {
            return 0;
        };

        let full_prefix = Self::entry_key(partition_name, prefix);
        let doomed: Vec<String> = part
            .entries
            .keys()
            .filter(|k| k.starts_with(&full_prefix))
            .cloned()
            .collect();
        for key in &doomed {
            part.remove(key, now);
        }
        doomed.len()
    }

    /// Drop a whole partition.
    pub fn clear_partition(&self, partition: &str) -> usize {
        let Some(mut partitions) = self.lock() else {
            return 0;
        };
        partitions
            .remove(partition)
            .map(|part| part.entries.len())
            .unwrap_or(0)
    }

    /// Size metadata, `None` for an unknown partition.
    pub fn partition_info(&self, partition: &str) -> Option<PartitionInfo> {
        let partitions = self.lock()?;
        partitions.get(partition).map(|part| PartitionInfo {
            size_bytes: part.size_bytes,
            entry_count: part.entries.len(),
            last_updated: part.last_updated,
        })
    }
}
