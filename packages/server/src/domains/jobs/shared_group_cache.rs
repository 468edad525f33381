//! Process-wide cache of `{shared-group-name → controller-side id}` (§4.3).
//!
//! Reads take a shared lock; a miss or an expired entry promotes to an
//! exclusive lock with a double-checked refresh so concurrent readers don't
//! pile up calling the controller. Every read returns an owned copy of the
//! map so callers can never observe (or corrupt) the writer's state mid-tear
//! (§5 "Shared resources", §8 "The shared-group cache returns maps that,
//! once observed, never mutate").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

use crate::kernel::nca::NetworkControllerAdapter;

const TTL: Duration = Duration::from_secs(5 * 60);

struct Cached {
    map: HashMap<String, String>,
    refreshed_at: Option<Instant>,
}

impl Cached {
    fn is_fresh(&self) -> bool {
        matches!(self.refreshed_at, Some(at) if at.elapsed() < TTL)
    }
}

/// Shared-group-name → controller-assigned-group-id cache for a single
/// fabric, backing the shared-contract associations every Job's group gets
/// (§4.2.4).
pub struct SharedGroupCache {
    fabric: String,
    nca: Arc<dyn NetworkControllerAdapter>,
    cache: RwLock<Cached>,
}

impl SharedGroupCache {
    pub fn new(fabric: String, nca: Arc<dyn NetworkControllerAdapter>) -> Self {
        Self {
            fabric,
            nca,
            cache: RwLock::new(Cached {
                map: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }

    /// Return a fresh (or, on refresh failure, stale) copy of the map.
    pub async fn get(&self) -> HashMap<String, String> {
        {
            let cached = self.cache.read().await;
            if cached.is_fresh() {
                return cached.map.clone();
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> HashMap<String, String> {
        let mut cached = self.cache.write().await;
        // Double-checked: another writer may have refreshed while we waited
        // for the exclusive lock.
        if cached.is_fresh() {
            return cached.map.clone();
        }

        match self.nca.get_security_groups(&self.fabric).await {
            Ok(groups) => {
                let map: HashMap<String, String> = groups
                    .into_iter()
                    .map(|g| (g.name, g.group_id))
                    .collect();
                cached.map = map.clone();
                cached.refreshed_at = Some(Instant::now());
                map
            }
            Err(error) => {
                warn!(fabric = %self.fabric, %error, "shared-group cache refresh failed, serving stale map");
                cached.map.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::nca_mock::MockNca;

    #[tokio::test]
    async fn populates_from_controller_on_first_read() {
        let nca = Arc::new(MockNca::new());
        nca.create_security_group("fab1", "shared-services", 100, &[])
            .await
            .unwrap();
        let cache = SharedGroupCache::new("fab1".to_string(), nca);

        let map = cache.get().await;
        assert_eq!(map.get("shared-services"), Some(&"100".to_string()));
    }

    #[tokio::test]
    async fn returned_map_is_a_disconnected_copy() {
        let nca = Arc::new(MockNca::new());
        let cache = SharedGroupCache::new("fab1".to_string(), nca);

        let mut map = cache.get().await;
        map.insert("injected".to_string(), "999".to_string());

        let fresh = cache.get().await;
        assert!(!fresh.contains_key("injected"));
    }
}
