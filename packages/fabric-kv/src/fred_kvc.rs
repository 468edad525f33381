use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::{Expiration, SetOptions};

use crate::error::Result;
use crate::kvc::KeyValueCoordinator;

/// Atomic counter-with-TTL script: increments the key, seeds its expiry only
/// on creation, and returns `{count, remaining_ttl_ms}` in one round trip.
const INCR_WITH_TTL_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local remaining = redis.call('PTTL', KEYS[1])
return { count, remaining }
"#;

/// Compare-and-delete script backing lock release: only deletes the key if
/// it still holds the caller's token, so a lock that expired and was
/// reacquired by someone else is never stolen back.
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// `KeyValueCoordinator` backed by a `fred` client pool against Redis (or a
/// Redis-protocol-compatible store).
#[derive(Clone)]
pub struct FredKvc {
    client: Client,
}

impl FredKvc {
    /// Connect to `redis_url` and wait for the connection to come up.
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let config = Config::from_url(redis_url)?;
        let client = Builder::from_config(config).build()?;
        client.init().await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KeyValueCoordinator for FredKvc {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let set: Option<String> = self
            .client
            .set(
                key,
                value,
                Some(Expiration::PX(ttl.as_millis() as i64)),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(set.is_some())
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expiration = ttl.map(|d| Expiration::PX(d.as_millis() as i64));
        let _: () = self.client.set(key, value, expiration, None, false).await?;
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let _: i64 = self.client.del(owned).await?;
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<(i64, i64)> {
        let (count, remaining): (i64, i64) = self
            .client
            .eval(
                INCR_WITH_TTL_SCRIPT,
                vec![key.to_string()],
                vec![ttl.as_millis().to_string()],
            )
            .await?;
        Ok((count, remaining))
    }

    async fn compare_and_delete(&self, key: &str, expected_value: &str) -> Result<bool> {
        let deleted: i64 = self
            .client
            .eval(
                COMPARE_AND_DELETE_SCRIPT,
                vec![key.to_string()],
                vec![expected_value.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}
