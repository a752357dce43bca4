use crate::config::RateLimitConfig;
use crate::store::{CounterEntry, CounterStore, StoreError};
use std::time::SystemTime;

/// The admission verdict for a single request.
///
/// A denial is a regular value; store failures are reported separately as a [StoreError].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request should be served.
    pub allowed: bool,
    /// Number of requests that will be permitted until the window resets.
    pub requests_left: u64,
    /// Start of the window this request was counted in.
    pub created_at: SystemTime,
}

impl Decision {
    pub fn from_entry(entry: CounterEntry, config: &RateLimitConfig) -> Self {
        Self {
            allowed: entry.count <= config.limit(),
            requests_left: config.limit().saturating_sub(entry.count),
            created_at: entry.created_at,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Time at which the window resets, [None] if it lies beyond what [SystemTime] can represent.
    pub fn reset_at(&self, config: &RateLimitConfig) -> Option<SystemTime> {
        self.created_at.checked_add(config.refresh_interval())
    }

    /// Whole seconds from `now` until the window resets, truncated, and 0 if it already has.
    pub fn seconds_until_reset(&self, config: &RateLimitConfig, now: SystemTime) -> u64 {
        match self.reset_at(config) {
            Some(reset_at) => reset_at
                .duration_since(now)
                .map_or(0, |remaining| remaining.as_secs()),
            None => u64::MAX,
        }
    }

    /// The rate limit status to report back to the caller.
    pub fn metadata(&self, config: &RateLimitConfig, now: SystemTime) -> ResponseMetadata {
        ResponseMetadata {
            limit: config.limit(),
            remaining: self.requests_left,
            reset: self.seconds_until_reset(config, now),
        }
    }
}

/// Rate limit status, in the form it is exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// Total number of requests that are permitted within the window.
    pub limit: u64,
    /// Number of requests that will be permitted until the window resets.
    pub remaining: u64,
    /// Seconds until the window resets.
    pub reset: u64,
}

/// Fixed window rate limiter.
///
/// Combines a [CounterStore] with a default [RateLimitConfig]. The engine holds no state of its
/// own; cloning it shares the underlying store.
#[derive(Debug, Clone)]
pub struct Gatekeeper<S> {
    store: S,
    config: RateLimitConfig,
}

impl<S: CounterStore> Gatekeeper<S> {
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Count a request against `key` and decide whether it may proceed, using the engine's
    /// default config.
    pub async fn gatekeep(&self, key: &str, now: SystemTime) -> Result<Decision, StoreError> {
        self.check_and_consume(key, &self.config, now).await
    }

    /// Count a request against `key` and decide whether it may proceed.
    ///
    /// Denied requests are counted too. Store failures are returned unchanged and never retried.
    pub async fn check_and_consume(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: SystemTime,
    ) -> Result<Decision, StoreError> {
        let entry = self
            .store
            .increment_or_create(key, now, config.refresh_interval())
            .await?;
        let decision = Decision::from_entry(entry, config);
        if decision.is_denied() {
            log::debug!(
                "Rate limit exceeded for key {key}: {} of {} requests",
                entry.count,
                config.limit()
            );
        }
        Ok(decision)
    }

    /// Read the current window for `key` without counting a request.
    pub async fn peek(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        self.store.peek(key).await
    }

    /// Forget the counter for `key`, the next request starts a fresh window.
    pub async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    const MINUTE: Duration = Duration::from_secs(60);

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    struct UnavailableStore;

    #[async_trait]
    impl CounterStore for UnavailableStore {
        async fn increment_or_create(
            &self,
            _key: &str,
            _now: SystemTime,
            _refresh_interval: Duration,
        ) -> Result<CounterEntry, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn peek(&self, _key: &str) -> Result<Option<CounterEntry>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_decision_from_entry() {
        let config = RateLimitConfig::new(2, MINUTE).unwrap();
        let decision = |count| {
            Decision::from_entry(
                CounterEntry {
                    count,
                    created_at: at(0),
                },
                &config,
            )
        };
        assert!(decision(1).is_allowed());
        assert_eq!(decision(1).requests_left, 1);
        // The last admitted request
        assert!(decision(2).is_allowed());
        assert_eq!(decision(2).requests_left, 0);
        // The first denied request
        assert!(decision(3).is_denied());
        assert_eq!(decision(3).requests_left, 0);
        assert!(decision(u64::MAX).is_denied());
    }

    #[test]
    fn test_metadata() {
        let config = RateLimitConfig::new(10, MINUTE).unwrap();
        let decision = Decision {
            allowed: true,
            requests_left: 7,
            created_at: at(0),
        };
        assert_eq!(
            decision.metadata(&config, at(0)),
            ResponseMetadata {
                limit: 10,
                remaining: 7,
                reset: 60
            }
        );
        // Truncated to whole seconds
        assert_eq!(
            decision.seconds_until_reset(&config, at(20) + Duration::from_millis(900)),
            39
        );
        // Floored at zero once the window is over
        assert_eq!(decision.seconds_until_reset(&config, at(90)), 0);
    }

    #[cfg(feature = "dashmap")]
    mod in_memory {
        use super::*;
        use crate::store::memory::InMemoryStore;
        use futures::executor::block_on;
        use std::sync::{Arc, Barrier};

        fn gatekeeper(limit: u64) -> Gatekeeper<InMemoryStore> {
            let store = InMemoryStore::builder().with_gc_interval(None).build();
            Gatekeeper::new(store, RateLimitConfig::new(limit, MINUTE).unwrap())
        }

        #[actix_web::test]
        async fn test_allow_deny() {
            let gatekeeper = gatekeeper(5);
            for i in (0..5).rev() {
                // First 5 should be allowed, with remaining counts decreasing
                let decision = gatekeeper.gatekeep("KEY1", at(0)).await.unwrap();
                assert!(decision.is_allowed());
                assert_eq!(decision.requests_left, i);
            }
            // Sixth should be denied
            let decision = gatekeeper.gatekeep("KEY1", at(0)).await.unwrap();
            assert!(decision.is_denied());
            assert_eq!(decision.requests_left, 0);
        }

        #[actix_web::test]
        async fn test_scenario() {
            let gatekeeper = gatekeeper(3);
            let mut allowed = Vec::new();
            let mut left = Vec::new();
            for t in 0..4 {
                let decision = gatekeeper.gatekeep("A", at(t)).await.unwrap();
                allowed.push(decision.allowed);
                left.push(decision.requests_left);
            }
            assert_eq!(allowed, [true, true, true, false]);
            assert_eq!(left, [2, 1, 0, 0]);
            // Window has reset
            let decision = gatekeeper.gatekeep("A", at(61)).await.unwrap();
            assert!(decision.is_allowed());
            assert_eq!(decision.requests_left, 2);
            assert_eq!(decision.created_at, at(61));
        }

        #[actix_web::test]
        async fn test_boundary_resets() {
            let gatekeeper = gatekeeper(1);
            assert!(gatekeeper.gatekeep("KEY1", at(0)).await.unwrap().is_allowed());
            assert!(gatekeeper.gatekeep("KEY1", at(59)).await.unwrap().is_denied());
            // Exactly one interval after the window started
            let decision = gatekeeper.gatekeep("KEY1", at(60)).await.unwrap();
            assert!(decision.is_allowed());
            assert_eq!(decision.requests_left, 0);
        }

        #[actix_web::test]
        async fn test_denied_requests_are_counted() {
            let gatekeeper = gatekeeper(1);
            for _ in 0..4 {
                let _ = gatekeeper.gatekeep("KEY1", at(0)).await.unwrap();
            }
            assert_eq!(gatekeeper.peek("KEY1").await.unwrap().unwrap().count, 4);
        }

        #[actix_web::test]
        async fn test_independent_keys() {
            let gatekeeper = gatekeeper(1);
            assert!(gatekeeper.gatekeep("KEY1", at(0)).await.unwrap().is_allowed());
            assert!(gatekeeper.gatekeep("KEY1", at(0)).await.unwrap().is_denied());
            assert!(gatekeeper.gatekeep("KEY2", at(0)).await.unwrap().is_allowed());
        }

        #[actix_web::test]
        async fn test_per_call_config() {
            let gatekeeper = gatekeeper(1);
            let relaxed = RateLimitConfig::new(3, MINUTE).unwrap();
            for i in (0..3).rev() {
                let decision = gatekeeper
                    .check_and_consume("KEY1", &relaxed, at(0))
                    .await
                    .unwrap();
                assert!(decision.is_allowed());
                assert_eq!(decision.requests_left, i);
            }
            // The default config is stricter and the count is shared
            assert!(gatekeeper.gatekeep("KEY1", at(0)).await.unwrap().is_denied());
        }

        #[actix_web::test]
        async fn test_peek_and_reset() {
            let gatekeeper = gatekeeper(1);
            assert_eq!(gatekeeper.peek("KEY1").await.unwrap(), None);
            let _ = gatekeeper.gatekeep("KEY1", at(0)).await.unwrap();
            for _ in 0..3 {
                assert_eq!(gatekeeper.peek("KEY1").await.unwrap().unwrap().count, 1);
            }
            assert!(gatekeeper.gatekeep("KEY1", at(1)).await.unwrap().is_denied());
            gatekeeper.reset("KEY1").await.unwrap();
            assert!(gatekeeper.gatekeep("KEY1", at(2)).await.unwrap().is_allowed());
        }

        #[actix_web::test]
        async fn test_shared_store() {
            let store: Arc<dyn CounterStore> =
                Arc::new(InMemoryStore::builder().with_gc_interval(None).build());
            let gatekeeper = Gatekeeper::new(store, RateLimitConfig::new(1, MINUTE).unwrap());
            assert!(gatekeeper.gatekeep("KEY1", at(0)).await.unwrap().is_allowed());
            assert!(gatekeeper.gatekeep("KEY1", at(0)).await.unwrap().is_denied());
        }

        #[test]
        fn test_concurrent_admissions() {
            const THREADS: usize = 8;
            const PER_THREAD: usize = 50;
            const LIMIT: u64 = 137;
            let gatekeeper = gatekeeper(LIMIT);
            let barrier = Arc::new(Barrier::new(THREADS));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let gatekeeper = gatekeeper.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        (0..PER_THREAD)
                            .map(|_| block_on(gatekeeper.gatekeep("KEY1", at(0))).unwrap())
                            .filter(Decision::is_allowed)
                            .count()
                    })
                })
                .collect();
            let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
            // Exactly the limit is admitted, the rest are denied
            assert_eq!(admitted as u64, LIMIT);
        }
    }

    #[actix_web::test]
    async fn test_store_failure_is_not_a_denial() {
        let gatekeeper = Gatekeeper::new(
            UnavailableStore,
            RateLimitConfig::new(1, MINUTE).unwrap(),
        );
        let result = gatekeeper.gatekeep("KEY1", at(0)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
