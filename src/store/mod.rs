#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use actix_web::{HttpResponse, ResponseError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// The state of a single key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Requests counted in the current window, including denied ones.
    pub count: u64,
    /// Start of the current window.
    pub created_at: SystemTime,
}

impl CounterEntry {
    pub(crate) fn new(now: SystemTime) -> Self {
        Self {
            count: 1,
            created_at: now,
        }
    }

    /// Whether a window that started at `created_at` is over at `now`.
    ///
    /// A `now` earlier than `created_at` (clock skew) is treated as no time having elapsed.
    pub fn window_elapsed(&self, now: SystemTime, refresh_interval: Duration) -> bool {
        now.duration_since(self.created_at)
            .map_or(false, |elapsed| elapsed >= refresh_interval)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Counter store returned a malformed entry for the rate limit key")]
    Malformed,
    #[error("Timestamp precedes the unix epoch")]
    PreEpochTimestamp,
}

impl ResponseError for StoreError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().finish()
    }
}

/// Describes a store of fixed window counters.
///
/// Implementations must perform [CounterStore::increment_or_create] as one atomic operation: two
/// concurrent calls for the same key must never both observe the pre-increment count.
///
/// Stores are shared between workers, so implementations usually wrap their state in an
/// [Arc]; many connection managers already do so internally.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count a request against `key`.
    ///
    /// If there is no entry for the key, or its window has elapsed (`now - created_at >=
    /// refresh_interval`), the entry is replaced with a count of 1 starting at `now`. Otherwise
    /// the count is incremented and the window start is left unchanged.
    ///
    /// Returns the entry as it was left by this call.
    async fn increment_or_create(
        &self,
        key: &str,
        now: SystemTime,
        refresh_interval: Duration,
    ) -> Result<CounterEntry, StoreError>;

    /// Read the entry for a key without modifying it.
    async fn peek(&self, key: &str) -> Result<Option<CounterEntry>, StoreError>;

    /// Removes the counter for a given rate limit key.
    ///
    /// Intended to be used to reset a key before changing the interval.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn increment_or_create(
        &self,
        key: &str,
        now: SystemTime,
        refresh_interval: Duration,
    ) -> Result<CounterEntry, StoreError> {
        (**self).increment_or_create(key, now, refresh_interval).await
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        (**self).peek(key).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }
}
