use crate::store::{CounterEntry, CounterStore, StoreError};
use actix_web::rt::task::JoinHandle;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60 * 10;

/// A [CounterStore] that uses [Dashmap](dashmap::DashMap) to keep counters in memory.
///
/// Counters are local to the process; use a shared store when running several instances.
#[derive(Clone)]
pub struct InMemoryStore {
    map: Arc<DashMap<String, Slot>>,
    gc_handle: Option<Arc<GcHandle>>,
}

struct Slot {
    entry: CounterEntry,
    refresh_interval: Duration,
}

impl Slot {
    fn new(now: SystemTime, refresh_interval: Duration) -> Self {
        Self {
            entry: CounterEntry::new(now),
            refresh_interval,
        }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.entry.window_elapsed(now, self.refresh_interval)
    }
}

// Aborts the collector once the last clone of the store is dropped.
struct GcHandle(JoinHandle<()>);

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl InMemoryStore {
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder {
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECONDS)),
        }
    }

    /// Remove every counter whose window has elapsed at `now`.
    pub fn purge_expired(&self, now: SystemTime) {
        Self::sweep(&self.map, now);
    }

    /// Number of keys currently tracked, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn sweep(map: &DashMap<String, Slot>, now: SystemTime) {
        let before = map.len();
        map.retain(|_k, v| !v.is_expired(now));
        log::trace!("Collected {} expired rate limit keys", before.saturating_sub(map.len()));
    }

    fn garbage_collector(map: Arc<DashMap<String, Slot>>, interval: Duration) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                Self::sweep(&map, SystemTime::now());
                actix_web::rt::time::sleep(interval).await;
            }
        })
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn increment_or_create(
        &self,
        key: &str,
        now: SystemTime,
        refresh_interval: Duration,
    ) -> Result<CounterEntry, StoreError> {
        let mut entry = CounterEntry::new(now);
        // The shard lock is held for the whole read-modify-write
        self.map
            .entry(key.to_string())
            .and_modify(|slot| {
                if slot.entry.window_elapsed(now, refresh_interval) {
                    // The window has elapsed, start a new one from this request.
                    *slot = Slot::new(now, refresh_interval);
                } else {
                    slot.entry.count = slot.entry.count.saturating_add(1);
                    slot.refresh_interval = refresh_interval;
                    entry = slot.entry;
                }
            })
            .or_insert_with(|| Slot::new(now, refresh_interval));
        Ok(entry)
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        Ok(self.map.get(key).map(|slot| slot.entry))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }
}

pub struct InMemoryStoreBuilder {
    gc_interval: Option<Duration>,
}

impl InMemoryStoreBuilder {
    /// Override the default garbage collector interval.
    ///
    /// Set to None to disable garbage collection.
    ///
    /// The garbage collector periodically scans the internal map, removing expired counters.
    /// It runs on the actix (local) runtime, so a store with garbage collection enabled must be
    /// built from within one.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn build(self) -> InMemoryStore {
        let map = Arc::new(DashMap::<String, Slot>::new());
        let gc_handle = self.gc_interval.map(|gc_interval| {
            Arc::new(GcHandle(InMemoryStore::garbage_collector(
                map.clone(),
                gc_interval,
            )))
        });
        InMemoryStore { map, gc_handle }
    }
}
