use crate::store::{CounterEntry, CounterStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const COUNT_FIELD: &str = "count";
const CREATED_AT_FIELD: &str = "created_at";

// KEYS[1]: counter hash, ARGV[1]: now (unix ms), ARGV[2]: refresh interval (ms)
// Returns {count, created_at}.
const INCREMENT_OR_CREATE: &str = r#"
local now = tonumber(ARGV[1])
local interval = tonumber(ARGV[2])
local created_at = tonumber(redis.call('HGET', KEYS[1], 'created_at'))
if created_at == nil or now - created_at >= interval then
    redis.call('HSET', KEYS[1], 'count', 1, 'created_at', now)
    redis.call('PEXPIRE', KEYS[1], interval)
    return {1, now}
end
local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
return {count, created_at}
"#;

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(Box::new(e))
    }
}

/// A [CounterStore] that keeps counters in Redis, so that they can be shared between instances.
///
/// Each request is counted with a single script invocation, which Redis executes atomically.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
    script: Arc<Script>,
}

impl RedisStore {
    /// Create a RedisStore Builder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use gatekeeper::store::redis::RedisStore;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let store = RedisStore::builder(manager).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all rate limit keys given to this store.
    ///
    /// This may be useful when the Redis instance is being used for other purposes; the prefix is
    /// used as a 'namespace' to avoid collision with other caches or keys inside Redis.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisStore {
        RedisStore {
            connection: self.connection,
            key_prefix: self.key_prefix,
            script: Arc::new(Script::new(INCREMENT_OR_CREATE)),
        }
    }
}

fn unix_millis(time: SystemTime) -> Result<u64, StoreError> {
    let since_epoch = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StoreError::PreEpochTimestamp)?;
    Ok(since_epoch.as_millis() as u64)
}

fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_or_create(
        &self,
        key: &str,
        now: SystemTime,
        refresh_interval: Duration,
    ) -> Result<CounterEntry, StoreError> {
        let key = self.make_key(key);
        let now = unix_millis(now)?;
        // PEXPIRE rejects zero, sub-millisecond windows round up
        let interval = (refresh_interval.as_millis() as u64).max(1);

        let mut con = self.connection.clone();
        let (count, created_at): (u64, u64) = self
            .script
            .key(key.as_ref())
            .arg(now)
            .arg(interval)
            .invoke_async(&mut con)
            .await?;
        Ok(CounterEntry {
            count,
            created_at: from_unix_millis(created_at),
        })
    }

    /// Note that the key prefix (if set) is automatically included, you do not need to prepend
    /// it yourself.
    async fn peek(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let (count, created_at): (Option<u64>, Option<u64>) = redis::cmd("HMGET")
            .arg(key.as_ref())
            .arg(COUNT_FIELD)
            .arg(CREATED_AT_FIELD)
            .query_async(&mut con)
            .await?;
        match (count, created_at) {
            (None, None) => Ok(None),
            (Some(count), Some(created_at)) => Ok(Some(CounterEntry {
                count,
                created_at: from_unix_millis(created_at),
            })),
            _ => Err(StoreError::Malformed),
        }
    }

    /// Note that the key prefix (if set) is automatically included, you do not need to prepend
    /// it yourself.
    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let () = con.del(key.as_ref()).await?;
        Ok(())
    }
}
