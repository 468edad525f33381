use std::time::Duration;

use crate::error::{KvcError, Result};
use crate::kvc::KeyValueCoordinator;

/// A held distributed lock. Dropping this without calling [`release`] leaves
/// the lock in place until its TTL expires — there is no synchronous
/// destructor that can safely make a network call, so release is explicit.
///
/// [`release`]: LockGuard::release
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    /// The lock key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock, but only if it still holds this guard's token —
    /// if the TTL already expired and someone else acquired it, this is a
    /// no-op rather than stealing it back.
    pub async fn release(self, kvc: &dyn KeyValueCoordinator) -> Result<()> {
        kvc.compare_and_delete(&self.key, &self.token).await?;
        Ok(())
    }
}

/// Acquire a distributed lock on `key` with the given `value` (typically a
/// replica or worker identity) and TTL, built from set-if-absent per §6.
///
/// Returns `Err(KvcError::LockNotAcquired)` if another holder currently owns
/// the key.
pub async fn acquire_lock(
    kvc: &dyn KeyValueCoordinator,
    key: &str,
    value: &str,
    ttl: Duration,
) -> Result<LockGuard> {
    let acquired = kvc.set_nx(key, value, ttl).await?;
    if !acquired {
        return Err(KvcError::LockNotAcquired {
            key: key.to_string(),
        });
    }
    Ok(LockGuard {
        key: key.to_string(),
        token: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKvc;

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let kvc = MockKvc::new();
        let guard = acquire_lock(&kvc, "deploy:batch:fab1:lock", "replica-a", Duration::from_secs(60))
            .await
            .unwrap();

        let err = acquire_lock(&kvc, "deploy:batch:fab1:lock", "replica-b", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, KvcError::LockNotAcquired { .. }));

        guard.release(&kvc).await.unwrap();

        acquire_lock(&kvc, "deploy:batch:fab1:lock", "replica-b", Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_does_not_steal_a_reacquired_lock() {
        let kvc = MockKvc::new();
        let guard = acquire_lock(&kvc, "lock-key", "holder-1", Duration::from_millis(10))
            .await
            .unwrap();

        // Simulate TTL expiry and a new holder taking the lock.
        kvc.expire_now("lock-key").await;
        acquire_lock(&kvc, "lock-key", "holder-2", Duration::from_secs(60))
            .await
            .unwrap();

        // holder-1's stale guard must not delete holder-2's lock.
        guard.release(&kvc).await.unwrap();
        assert_eq!(
            kvc.get_string("lock-key").await.unwrap(),
            Some("holder-2".to_string())
        );
    }
}
