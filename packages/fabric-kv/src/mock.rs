use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::kvc::KeyValueCoordinator;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

/// In-memory [`KeyValueCoordinator`] for deterministic unit tests of the
/// deploy batcher and lock helpers, without a real Redis. Mirrors the
/// semantics of the real contract exactly (including TTL expiry), just
/// without a network hop.
#[derive(Default)]
pub struct MockKvc {
    store: Mutex<HashMap<String, Entry>>,
}

impl MockKvc {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Test-only helper: force a key to appear already expired, to exercise
    /// TTL-expiry races without sleeping in tests.
    pub async fn expire_now(&self, key: &str) {
        let mut store = self.store.lock().await;
        if let Some(entry) = store.get_mut(key) {
            entry.expires_at = Some(Instant::now() - Duration::from_secs(1));
        }
    }
}

#[async_trait]
impl KeyValueCoordinator for MockKvc {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut store = self.store.lock().await;
        if let Some(existing) = store.get(key) {
            if existing.is_live() {
                return Ok(false);
            }
        }
        store.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut store = self.store.lock().await;
        store.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let store = self.store.lock().await;
        Ok(store
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, keys: &[&str]) -> Result<()> {
        let mut store = self.store.lock().await;
        for key in keys {
            store.remove(*key);
        }
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<(i64, i64)> {
        let mut store = self.store.lock().await;
        let is_new = !store.get(key).map(|e| e.is_live()).unwrap_or(false);
        let count = if is_new {
            store.insert(
                key.to_string(),
                Entry {
                    value: "1".to_string(),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            1
        } else {
            let entry = store.get_mut(key).expect("checked live above");
            let next: i64 = entry.value.parse().unwrap_or(0) + 1;
            entry.value = next.to_string();
            next
        };
        let remaining = store
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as i64)
            .unwrap_or(-1);
        Ok((count, remaining))
    }

    async fn compare_and_delete(&self, key: &str, expected_value: &str) -> Result<bool> {
        let mut store = self.store.lock().await;
        let matches = store
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value == expected_value)
            .unwrap_or(false);
        if matches {
            store.remove(key);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_fails_while_live_and_succeeds_after_expiry() {
        let kvc = MockKvc::new();
        assert!(kvc.set_nx("k", "v1", Duration::from_millis(20)).await.unwrap());
        assert!(!kvc.set_nx("k", "v2", Duration::from_millis(20)).await.unwrap());

        kvc.expire_now("k").await;
        assert!(kvc.set_nx("k", "v3", Duration::from_secs(60)).await.unwrap());
        assert_eq!(kvc.get_string("k").await.unwrap(), Some("v3".to_string()));
    }

    #[tokio::test]
    async fn incr_with_ttl_seeds_expiry_once() {
        let kvc = MockKvc::new();
        let (count, ttl1) = kvc.incr_with_ttl("counter", Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, 1);
        assert!(ttl1 > 0);

        let (count, ttl2) = kvc.incr_with_ttl("counter", Duration::from_secs(5)).await.unwrap();
        assert_eq!(count, 2);
        // Second call's ttl arg is ignored; the original 60s expiry still governs.
        assert!(ttl2 > Duration::from_secs(5).as_millis() as i64);
    }

    #[tokio::test]
    async fn compare_and_delete_only_matches_expected_value() {
        let kvc = MockKvc::new();
        kvc.set_string("k", "v1", None).await.unwrap();
        assert!(!kvc.compare_and_delete("k", "wrong").await.unwrap());
        assert!(kvc.compare_and_delete("k", "v1").await.unwrap());
        assert_eq!(kvc.get_string("k").await.unwrap(), None);
    }
}
