use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, RedisResult, Script};

use super::store::{SharedStore, StoreError};

const INCREMENT_WITH_EXPIRY: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if redis.call('PTTL', KEYS[1]) < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return value
"#;

const COMPARE_AND_SWAP: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
  return 1
end
return 0
"#;

/// Redis-backed [`SharedStore`]. Atomic multi-step operations run as Lua scripts.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    operation_timeout: Duration,
    increment_script: Script,
    cas_script: Script,
}

impl RedisStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            manager,
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
            increment_script: Script::new(INCREMENT_WITH_EXPIRY),
            cas_script: Script::new(COMPARE_AND_SWAP),
        })
    }

    /// Bound every round trip so a stalled Redis surfaces as an error instead of a hang.
    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(operation = op, error = %e, "Redis operation failed");
                Err(StoreError::Unavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(operation = op, "Redis operation timed out");
                Err(StoreError::Timeout(self.operation_timeout))
            }
        }
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(
            "increment",
            self.increment_script
                .key(key)
                .arg(delta)
                .arg(ttl_ms(ttl))
                .invoke_async(&mut conn),
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        self.bounded("get", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(
            "set",
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn),
        )
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .bounded(
                "set_if_absent",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let updated: i64 = self
            .bounded(
                "expire",
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl_ms(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(updated == 1)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let swapped: i64 = self
            .bounded(
                "compare_and_swap",
                self.cas_script
                    .key(key)
                    .arg(expected)
                    .arg(new_value)
                    .arg(ttl_ms(ttl))
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = self
            .bounded("delete", redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn add_member(
        &self,
        set_key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(
            "add_member",
            redis::pipe()
                .atomic()
                .cmd("SADD")
                .arg(set_key)
                .arg(member)
                .ignore()
                .cmd("PEXPIRE")
                .arg(set_key)
                .arg(ttl_ms(ttl))
                .ignore()
                .query_async(&mut conn),
        )
        .await
    }

    async fn remove_member(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _removed: i64 = self
            .bounded(
                "remove_member",
                redis::cmd("SREM")
                    .arg(set_key)
                    .arg(member)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn members(&self, set_key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        let mut members: Vec<String> = self
            .bounded(
                "members",
                redis::cmd("SMEMBERS").arg(set_key).query_async(&mut conn),
            )
            .await?;
        members.sort();
        Ok(members)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _pong: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
