//! Counter Store
//!
//! The shared key-value store behind the rate limiter and the cost tracker.
//! It is the only shared mutable state in the admission path, so every
//! operation must be atomic with respect to concurrent callers touching the
//! same key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::clock::{Clock, SystemClock};
use super::error::StoreError;

/// Connectivity and backend details reported by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHealth {
    /// Backend name ("memory", "redis")
    pub backend: String,

    /// Whether the store answered the probe
    pub connected: bool,

    /// Server version, when the backend reports one
    pub version: Option<String>,

    /// Server uptime in days
    pub uptime_days: Option<u64>,

    /// Human-readable memory usage
    pub memory_used: Option<String>,

    /// Number of live keys, when cheap to compute
    pub keys: Option<u64>,
}

/// Atomic counter store
///
/// Increments create the key at zero when absent and return the
/// post-increment value; the increment itself is the atomic unit. The
/// `*_with_expiry` variants compose the increment with a TTL refresh; the
/// default implementations issue two calls, backends override them with a
/// single transaction where they can.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Raw value of a key, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically add `by` to an integer counter
    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError>;

    /// Atomically add `by` to a float counter
    async fn increment_float(&self, key: &str, by: f64) -> Result<f64, StoreError>;

    /// Set or refresh the TTL of a key; no-op when the key is absent
    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError>;

    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn members_of(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Probe connectivity
    async fn health(&self) -> Result<StoreHealth, StoreError>;

    async fn increment_with_expiry(
        &self,
        key: &str,
        by: i64,
        ttl_secs: u64,
    ) -> Result<i64, StoreError> {
        let value = self.increment(key, by).await?;
        self.expire(key, ttl_secs).await?;
        Ok(value)
    }

    async fn increment_float_with_expiry(
        &self,
        key: &str,
        by: f64,
        ttl_secs: u64,
    ) -> Result<f64, StoreError> {
        let value = self.increment_float(key, by).await?;
        self.expire(key, ttl_secs).await?;
        Ok(value)
    }

    async fn add_to_set_with_expiry(
        &self,
        key: &str,
        member: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        self.add_to_set(key, member).await?;
        self.expire(key, ttl_secs).await
    }

    /// Integer value of a key, `None` when absent
    async fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.get(key).await? {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StoreError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                }),
            None => Ok(None),
        }
    }

    /// Float value of a key, `None` when absent
    async fn get_f64(&self, key: &str) -> Result<Option<f64>, StoreError> {
        match self.get(key).await? {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StoreError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                }),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Int(i64),
    Float(f64),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Unix seconds at which the entry stops being visible
    expires_at: Option<i64>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Live entry for `key`, dropping it first if it has expired
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: i64,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

/// In-process counter store
///
/// Every operation holds the write lock for its whole read-modify-write, so
/// concurrent increments on one key never lose updates. TTLs are evaluated
/// against the injected clock; expired entries are invisible immediately and
/// removed lazily (or eagerly via [`MemoryStore::purge_expired`]).
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store whose TTLs follow the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Whether a live entry exists for `key`
    pub async fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_secs();
        let entries = self.entries.read().await;
        entries.get(key).is_some_and(|e| e.is_live(now))
    }

    /// Remaining TTL of a key in seconds (`None` when absent or persistent)
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_secs();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at - now)
    }

    /// Live keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        let now = self.clock.now_secs();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        self.keys().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_secs();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Int(n) => Ok(Some(n.to_string())),
                Value::Float(f) => Ok(Some(f.to_string())),
                Value::Set(_) => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => match &mut entry.value {
                Value::Int(n) => {
                    *n = n.checked_add(by).ok_or_else(|| StoreError::InvalidValue {
                        key: key.to_string(),
                        value: format!("{} + {} overflows", n, by),
                    })?;
                    Ok(*n)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => {
                entries.insert(key.to_string(), Entry::new(Value::Int(by)));
                Ok(by)
            }
        }
    }

    async fn increment_float(&self, key: &str, by: f64) -> Result<f64, StoreError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                let total = match entry.value {
                    Value::Int(n) => n as f64 + by,
                    Value::Float(f) => f + by,
                    Value::Set(_) => return Err(StoreError::WrongType(key.to_string())),
                };
                entry.value = Value::Float(total);
                Ok(total)
            }
            None => {
                entries.insert(key.to_string(), Entry::new(Value::Float(by)));
                Ok(by)
            }
        }
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().await;
        if let Some(entry) = live_entry(&mut entries, key, now) {
            entry.expires_at = Some(now.saturating_add(seconds as i64));
        }
        Ok(())
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => match &mut entry.value {
                Value::Set(members) => {
                    members.insert(member.to_string());
                    Ok(())
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => {
                let members = HashSet::from([member.to_string()]);
                entries.insert(key.to_string(), Entry::new(Value::Set(members)));
                Ok(())
            }
        }
    }

    async fn members_of(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let now = self.clock.now_secs();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(HashSet::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write().await;
        let emptied = match live_entry(&mut entries, key, now) {
            None => return Ok(()),
            Some(entry) => match &mut entry.value {
                Value::Set(members) => {
                    members.remove(member);
                    members.is_empty()
                }
                _ => return Err(StoreError::WrongType(key.to_string())),
            },
        };
        // Empty sets disappear, as in Redis
        if emptied {
            entries.remove(key);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn health(&self) -> Result<StoreHealth, StoreError> {
        Ok(StoreHealth {
            backend: "memory".to_string(),
            connected: true,
            version: None,
            uptime_days: None,
            memory_used: None,
            keys: Some(self.len().await as u64),
        })
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        by: i64,
        ttl_secs: u64,
    ) -> Result<i64, StoreError> {
        let now = self.clock.now_secs();
        let expires_at = Some(now.saturating_add(ttl_secs as i64));
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => match &mut entry.value {
                Value::Int(n) => {
                    *n = n.checked_add(by).ok_or_else(|| StoreError::InvalidValue {
                        key: key.to_string(),
                        value: format!("{} + {} overflows", n, by),
                    })?;
                    let value = *n;
                    entry.expires_at = expires_at;
                    Ok(value)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Int(by),
                        expires_at,
                    },
                );
                Ok(by)
            }
        }
    }

    async fn increment_float_with_expiry(
        &self,
        key: &str,
        by: f64,
        ttl_secs: u64,
    ) -> Result<f64, StoreError> {
        let now = self.clock.now_secs();
        let expires_at = Some(now.saturating_add(ttl_secs as i64));
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                let total = match entry.value {
                    Value::Int(n) => n as f64 + by,
                    Value::Float(f) => f + by,
                    Value::Set(_) => return Err(StoreError::WrongType(key.to_string())),
                };
                entry.value = Value::Float(total);
                entry.expires_at = expires_at;
                Ok(total)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Float(by),
                        expires_at,
                    },
                );
                Ok(by)
            }
        }
    }
}
