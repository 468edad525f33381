use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// The key-value coordinator contract required by the fabric provisioning
/// core: atomic set-if-absent with TTL, string get/set with TTL, delete,
/// counter-increment-with-TTL, and atomic script evaluation.
///
/// Implementations are expected to be cheaply cloneable handles around a
/// pooled connection (see [`crate::fred_kvc::FredKvc`]); the trait itself
/// only requires `Send + Sync` so it can live behind an `Arc<dyn ...>` in a
/// dependency container.
#[async_trait]
pub trait KeyValueCoordinator: Send + Sync {
    /// Set `key` to `value` with the given TTL only if it does not already
    /// exist. Returns `true` if the set happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Unconditionally set `key` to `value`. `ttl` of `None` means no
    /// expiration.
    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Fetch the current value of `key`, or `None` if it is absent.
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete the given keys. Missing keys are not an error.
    async fn delete(&self, keys: &[&str]) -> Result<()>;

    /// Atomically increment `key`, setting its TTL only on the first
    /// increment (when the counter is created), and return the new count
    /// alongside the remaining TTL in milliseconds.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<(i64, i64)>;

    /// Atomically delete `key` if and only if its current value equals
    /// `expected_value`. Used to release a lock without clobbering a holder
    /// that has since taken over the key after TTL expiry. Returns whether
    /// the delete happened.
    async fn compare_and_delete(&self, key: &str, expected_value: &str) -> Result<bool>;
}
