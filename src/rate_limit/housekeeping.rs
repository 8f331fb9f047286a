//! Window Housekeeping
//!
//! Prunes a caller's window index so it stays bounded between natural
//! expiries. Window counters expire on their own; this only removes entries
//! older than the previous window, plus any index member whose window start
//! cannot be parsed.

use std::sync::Arc;
use tracing::{debug, info};

use super::clock::Clock;
use super::config::MAX_WINDOW_SECONDS;
use super::error::AdmissionError;
use super::keys;
use super::store::CounterStore;

/// Index member that does not end in a window timestamp
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed window key: {0}")]
struct MalformedWindowKey(String);

fn window_start_of(key: &str) -> Result<i64, MalformedWindowKey> {
    keys::parse_window_start(key).ok_or_else(|| MalformedWindowKey(key.to_string()))
}

/// Removes stale window keys from callers' indexes
#[derive(Debug, Clone)]
pub struct WindowHousekeeper {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    window_seconds: u64,
}

impl WindowHousekeeper {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, window_seconds: u64) -> Self {
        Self {
            store,
            clock,
            window_seconds: window_seconds.clamp(1, MAX_WINDOW_SECONDS),
        }
    }

    /// Delete every indexed window that started more than one window before
    /// the current one, and every malformed index member
    ///
    /// Returns how many index members were removed. Never touches the current
    /// or the previous window, so running it repeatedly is harmless.
    pub async fn cleanup_stale_windows(&self, caller_id: &str) -> Result<usize, AdmissionError> {
        let index_key = keys::window_index_key(caller_id);
        let members = self.store.members_of(&index_key).await?;

        let window = self.window_seconds as i64;
        let now = self.clock.now_secs();
        let current_window = now - now.rem_euclid(window);
        let oldest_kept = current_window - window;

        let mut removed = 0;
        for member in members {
            match window_start_of(&member) {
                Ok(start) if start >= oldest_kept => continue,
                Ok(start) => debug!("Purging stale window {} (started {})", member, start),
                Err(e) => debug!("Purging index member: {}", e),
            }
            self.store.delete(&member).await?;
            self.store.remove_from_set(&index_key, &member).await?;
            removed += 1;
        }

        if removed > 0 {
            info!(
                "Cleaned up {} old rate limit windows for caller {}",
                removed, caller_id
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::store::MemoryStore;

    const T0: i64 = 1_700_000_100;

    fn setup() -> (WindowHousekeeper, MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_secs(T0));
        let store = MemoryStore::with_clock(clock.clone());
        let keeper = WindowHousekeeper::new(Arc::new(store.clone()), clock.clone(), 300);
        (keeper, store, clock)
    }

    async fn index_window(store: &MemoryStore, caller: &str, start: i64) -> String {
        let key = keys::window_key(caller, start);
        store.increment(&key, 1).await.unwrap();
        store
            .add_to_set(&keys::window_index_key(caller), &key)
            .await
            .unwrap();
        key
    }

    #[test]
    fn test_window_start_of() {
        assert_eq!(window_start_of("rate_limit:u:window:600"), Ok(600));
        assert!(window_start_of("rate_limit:u:window:x").is_err());
    }

    #[tokio::test]
    async fn test_keeps_current_and_previous_window() {
        let (keeper, store, _) = setup();
        let current = index_window(&store, "u", T0).await;
        let previous = index_window(&store, "u", T0 - 300).await;

        assert_eq!(keeper.cleanup_stale_windows("u").await.unwrap(), 0);
        assert!(store.contains_key(&current).await);
        assert!(store.contains_key(&previous).await);
    }

    #[tokio::test]
    async fn test_removes_old_windows() {
        let (keeper, store, _) = setup();
        let stale = index_window(&store, "u", T0 - 600).await;
        let older = index_window(&store, "u", T0 - 3_000).await;
        let current = index_window(&store, "u", T0).await;

        assert_eq!(keeper.cleanup_stale_windows("u").await.unwrap(), 2);
        assert!(!store.contains_key(&stale).await);
        assert!(!store.contains_key(&older).await);

        let members = store.members_of(&keys::window_index_key("u")).await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members.contains(&current));
    }

    #[tokio::test]
    async fn test_removes_malformed_members() {
        let (keeper, store, _) = setup();
        let index = keys::window_index_key("u");
        store.add_to_set(&index, "rate_limit:u:window:garbage").await.unwrap();
        store.add_to_set(&index, "nonsense").await.unwrap();
        store.increment("nonsense", 1).await.unwrap();

        assert_eq!(keeper.cleanup_stale_windows("u").await.unwrap(), 2);
        assert!(!store.contains_key("nonsense").await);
        assert!(store.members_of(&index).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotent() {
        let (keeper, store, clock) = setup();
        index_window(&store, "u", T0).await;
        clock.advance_secs(900);

        assert_eq!(keeper.cleanup_stale_windows("u").await.unwrap(), 1);
        assert_eq!(keeper.cleanup_stale_windows("u").await.unwrap(), 0);
        assert_eq!(keeper.cleanup_stale_windows("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mid_window_boundary() {
        let (keeper, store, clock) = setup();
        let previous = index_window(&store, "u", T0).await;
        // still inside the window after T0
        clock.advance_secs(599);
        assert_eq!(keeper.cleanup_stale_windows("u").await.unwrap(), 0);
        assert!(store
            .members_of(&keys::window_index_key("u"))
            .await
            .unwrap()
            .contains(&previous));
    }
}
