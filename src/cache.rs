//! The public `Cache<V>` handle: API surface plus the lifecycle controller.
//!
//! Constructing a [`Cache`] spawns and owns both background tasks (the
//! expiration scheduler and the callback dispatcher) internally, so that
//! [`Cache::close`] can join them itself rather than leaving that to the
//! caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::callback::{self, Callbacks, DispatchJob, DispatchSender, EvictionReason};
use crate::config::CacheConfig;
use crate::entry::{Entry, Ttl};
use crate::error::Error;
use crate::loader::{Loader, LoaderError};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::scheduler;
use crate::store::Store;

/// State shared by every clone of a [`Cache`] and by its background tasks.
pub(crate) struct Shared<V> {
    pub(crate) store: Mutex<Store<V>>,
    pub(crate) wake: Notify,
    pub(crate) metrics: Metrics,
    pub(crate) callbacks: Arc<RwLock<Callbacks<V>>>,
    /// `None` once `close()` has dropped it, which is what lets the
    /// dispatcher task's `recv()` return `None` and the task exit.
    dispatch_tx: Mutex<Option<DispatchSender<V>>>,
    loader: RwLock<Option<Arc<dyn Loader<V> + Send + Sync>>>,
    closing: AtomicBool,
}

impl<V> Shared<V>
where
    V: Send + 'static,
{
    pub(crate) fn dispatch(&self, job: DispatchJob<V>) {
        if let Some(tx) = self.dispatch_tx.lock().as_ref() {
            let _ = tx.send(job);
        }
    }

    /// Like [`Shared::dispatch`], but reports whether the job was actually
    /// enqueued (the dispatcher task may already be gone).
    pub(crate) fn try_dispatch(&self, job: DispatchJob<V>) -> bool {
        match self.dispatch_tx.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }
}

struct TaskHandles {
    scheduler: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Concurrency-safe in-memory cache with per-entry TTL, bounded capacity,
/// eviction callbacks, and a single-flight loader for misses.
///
/// `Cache<V>` is cheaply `Clone`: every clone shares the same backing store
/// and the same two background tasks via an `Arc`-wrapped handle.
pub struct Cache<V> {
    shared: Arc<Shared<V>>,
    tasks: Arc<tokio::sync::Mutex<Option<TaskHandles>>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build a new cache and spawn its scheduler and dispatcher tasks.
    pub fn new(config: CacheConfig) -> Self {
        let callbacks = Arc::new(RwLock::new(Callbacks::default()));
        let (dispatch_tx, dispatcher_handle) = callback::spawn(callbacks.clone());

        let shared = Arc::new(Shared {
            store: Mutex::new(Store::new(config)),
            wake: Notify::new(),
            metrics: Metrics::default(),
            callbacks,
            dispatch_tx: Mutex::new(Some(dispatch_tx)),
            loader: RwLock::new(None),
            closing: AtomicBool::new(false),
        });

        let scheduler_handle = scheduler::spawn(shared.clone());

        debug!("cache constructed, scheduler and dispatcher tasks spawned");

        Cache {
            shared,
            tasks: Arc::new(tokio::sync::Mutex::new(Some(TaskHandles {
                scheduler: scheduler_handle,
                dispatcher: dispatcher_handle,
            }))),
        }
    }

    /// Insert `value` under `key`, using the configured global TTL.
    pub fn set(&self, key: impl Into<String>, value: V) -> Result<(), Error> {
        self.set_with_ttl(key, value, Ttl::Default)
    }

    /// Insert `value` under `key` with an explicit per-entry TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Ttl) -> Result<(), Error> {
        let key = key.into();
        let created = {
            let mut store = self.shared.store.lock();
            if store.closed {
                return Err(Error::Closed);
            }
            let global_ttl = store.config.ttl;
            let limit = store.config.cache_size_limit;
            evict_for_capacity(&mut store, &self.shared, limit, &key);
            let entry = Entry::new(value.clone(), Instant::now(), ttl, global_ttl);
            store.insert(key.clone(), entry).0
        };

        self.shared.metrics.record_insert();
        self.shared.wake.notify_one();
        if created {
            self.shared.dispatch(DispatchJob::NewItem { key, value });
        }
        Ok(())
    }

    /// Look up `key`.
    ///
    /// On a live hit, extends the entry's TTL unless
    /// `skip_ttl_extension_on_hit` is set. On a miss, routes through the
    /// configured loader (coalescing concurrent misses for the same key
    /// into one loader invocation) or returns [`Error::NotFound`] if no
    /// loader is configured.
    pub async fn get(&self, key: &str) -> Result<V, Error> {
        let now = Instant::now();

        if let Some(value) = self.try_hit(key, now) {
            self.shared.metrics.record_hit();
            self.shared.metrics.record_retrieval();
            return Ok(value);
        }

        let loader = {
            let store = self.shared.store.lock();
            if store.closed {
                return Err(Error::Closed);
            }
            self.shared.loader.read().clone()
        };

        let Some(loader) = loader else {
            self.shared.metrics.record_miss();
            return Err(Error::NotFound);
        };

        enum Role<V> {
            Leader,
            Follower(broadcast::Receiver<Result<V, Error>>),
        }

        let role = {
            let mut store = self.shared.store.lock();
            if store.closed {
                return Err(Error::Closed);
            }
            if let Some(sender) = store.inflight.get(key) {
                Role::Follower(sender.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                store.inflight.insert(key.to_string(), tx);
                Role::Leader
            }
        };

        match role {
            Role::Follower(mut rx) => {
                let result = rx.recv().await.unwrap_or(Err(Error::Closed));
                match &result {
                    Ok(_) => {
                        self.shared.metrics.record_hit();
                        self.shared.metrics.record_retrieval();
                    }
                    Err(Error::NotFound) => self.shared.metrics.record_miss(),
                    Err(_) => {}
                }
                result
            }
            Role::Leader => {
                trace!(key, "invoking loader");
                let load_result = loader.load(key).await;
                self.complete_load(key, load_result)
            }
        }
    }

    /// Non-mutating live-entry check: returns the value if `key` is present
    /// and not (yet) logically expired. Does not remove stale-but-present
    /// entries; that is left to the scheduler, which alone decides eviction
    /// (subject to the check-expiration callback).
    fn try_hit(&self, key: &str, now: Instant) -> Option<V> {
        let mut store = self.shared.store.lock();
        if store.closed {
            return None;
        }
        let live = store.get(key).map(|e| !e.expires_at.is_due(now))?;
        if !live {
            return None;
        }

        let skip = store.config.skip_ttl_extension_on_hit;
        if !skip {
            let global_ttl = store.config.ttl;
            if let Some(entry) = store.get_mut(key) {
                entry.extend_from(now, global_ttl);
            }
            store.resift(key);
        }
        let value = store.get(key).map(|e| e.value.clone());
        drop(store);
        if !skip {
            self.shared.wake.notify_one();
        }
        value
    }

    fn complete_load(&self, key: &str, result: Result<(V, Ttl), LoaderError>) -> Result<V, Error> {
        let mut store = self.shared.store.lock();
        let sender = store.inflight.remove(key);

        if store.closed {
            drop(store);
            if let Some(sender) = sender {
                let _ = sender.send(Err(Error::Closed));
            }
            return Err(Error::Closed);
        }

        // The loader's error, if any, is wrapped verbatim, never reinterpreted.
        let result = result.map_err(Error::from_loader);

        match result {
            Ok((value, ttl)) => {
                let global_ttl = store.config.ttl;
                let limit = store.config.cache_size_limit;
                evict_for_capacity(&mut store, &self.shared, limit, key);
                let entry = Entry::new(value.clone(), Instant::now(), ttl, global_ttl);
                let created = store.insert(key.to_string(), entry).0;
                drop(store);

                self.shared.metrics.record_insert();
                self.shared.wake.notify_one();
                if created {
                    self.shared.dispatch(DispatchJob::NewItem {
                        key: key.to_string(),
                        value: value.clone(),
                    });
                }

                self.shared.metrics.record_hit();
                self.shared.metrics.record_retrieval();
                if let Some(sender) = sender {
                    let _ = sender.send(Ok(value.clone()));
                }
                Ok(value)
            }
            Err(err) => {
                drop(store);
                self.shared.metrics.record_miss();
                if let Some(sender) = sender {
                    let _ = sender.send(Err(err.clone()));
                }
                Err(err)
            }
        }
    }

    /// Remove `key`, firing the terminal callback with reason `Removed`.
    pub fn remove(&self, key: &str) -> Result<(), Error> {
        let removed = {
            let mut store = self.shared.store.lock();
            if store.closed {
                return Err(Error::Closed);
            }
            store.remove(key)
        };

        match removed {
            Some(entry) => {
                self.shared.wake.notify_one();
                self.shared.dispatch(DispatchJob::Terminal {
                    key: key.to_string(),
                    value: entry.value,
                    reason: EvictionReason::Removed,
                });
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Remove every entry, firing the terminal callback with reason
    /// `Removed` for each.
    pub fn purge(&self) -> Result<(), Error> {
        let drained = {
            let mut store = self.shared.store.lock();
            if store.closed {
                return Err(Error::Closed);
            }
            store.drain_all()
        };

        self.shared.wake.notify_one();
        for (key, entry) in drained {
            self.shared.dispatch(DispatchJob::Terminal {
                key,
                value: entry.value,
                reason: EvictionReason::Removed,
            });
        }
        Ok(())
    }

    /// Number of live entries. Returns `0` after `close()`.
    pub fn count(&self) -> usize {
        let store = self.shared.store.lock();
        if store.closed {
            0
        } else {
            store.len()
        }
    }

    /// A snapshot of the cache's monotonic usage counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Set the global TTL applied to entries using [`Ttl::Default`].
    pub fn set_ttl(&self, ttl: Duration) -> Result<(), Error> {
        let mut store = self.shared.store.lock();
        if store.closed {
            return Err(Error::Closed);
        }
        store.config.ttl = Some(ttl);
        Ok(())
    }

    /// Set the maximum number of live entries (`0` = unbounded).
    pub fn set_cache_size_limit(&self, limit: usize) {
        self.shared.store.lock().config.cache_size_limit = limit;
    }

    /// If `true`, a hit no longer extends an entry's expiration.
    pub fn set_skip_ttl_extension_on_hit(&self, skip: bool) {
        self.shared.store.lock().config.skip_ttl_extension_on_hit = skip;
    }

    /// Configure the loader invoked on a cache miss.
    pub fn set_loader<L>(&self, loader: L)
    where
        L: Loader<V> + 'static,
    {
        *self.shared.loader.write() = Some(Arc::new(loader));
    }

    /// Set the callback fired when an entry expires by time.
    pub fn set_expiration_callback<F>(&self, f: F)
    where
        F: Fn(&str, &V) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().expiration = Some(Arc::new(f));
    }

    /// Set the callback fired on any terminal removal, carrying the reason.
    pub fn set_expiration_reason_callback<F>(&self, f: F)
    where
        F: Fn(&str, EvictionReason, &V) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().reason = Some(Arc::new(f));
    }

    /// Set the predicate consulted before a time-expired entry is actually
    /// evicted; returning `false` retains the entry with its TTL extended.
    pub fn set_check_expiration_callback<F>(&self, f: F)
    where
        F: Fn(&str, &V) -> bool + Send + Sync + 'static,
    {
        self.shared.callbacks.write().check_expiration = Some(Arc::new(f));
    }

    /// Set the callback fired when a brand-new entry is inserted (not on
    /// overwrite of an existing key, nor on TTL extension).
    pub fn set_new_item_callback<F>(&self, f: F)
    where
        F: Fn(&str, &V) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().new_item = Some(Arc::new(f));
    }

    /// Close the cache.
    ///
    /// Drains every remaining entry through the callback dispatcher with
    /// reason `Closed`, discards (with `Error::Closed`) any in-flight
    /// loader subscribers, and waits for both background tasks to exit
    /// before returning. Idempotent on observable state, but returns
    /// `Error::Closed` on the second call.
    pub async fn close(&self) -> Result<(), Error> {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let (drained, inflight_senders) = {
            let mut store = self.shared.store.lock();
            store.closed = true;
            let drained = store.drain_all();
            let inflight_senders: Vec<_> = store.inflight.drain().map(|(_, s)| s).collect();
            (drained, inflight_senders)
        };

        debug!(entries = drained.len(), "closing cache, draining outstanding entries");

        for sender in inflight_senders {
            let _ = sender.send(Err(Error::Closed));
        }

        for (key, entry) in drained {
            self.shared.dispatch(DispatchJob::Terminal {
                key,
                value: entry.value,
                reason: EvictionReason::Closed,
            });
        }

        self.shared.wake.notify_one();

        if let Some(TaskHandles { scheduler, dispatcher }) = self.tasks.lock().await.take() {
            // Wait for the scheduler to observe `closed` and return before
            // dropping the dispatcher sender. The scheduler may currently be
            // mid `fire_due_entries` (e.g. awaiting a check-expiration
            // verdict on an entry it already popped from the store, which
            // this `close()`'s own `drain_all()` above never saw); any
            // `Terminal`/retained-entry job it still has to enqueue must
            // find `dispatch_tx` populated, or that entry would get zero
            // terminal notifications.
            let _ = scheduler.await;

            // Only now drop the only sender, so the dispatcher's queue
            // drains (including anything the scheduler just enqueued) and
            // its `recv()` loop observes the channel closed.
            let _ = self.shared.dispatch_tx.lock().take();

            let _ = dispatcher.await;
        }

        debug!("cache closed");
        Ok(())
    }
}

/// Evict the soonest-to-expire entry if inserting `incoming_key` would push
/// the store over `limit`. A no-op for overwrites of an existing key, since
/// those never need to make room.
fn evict_for_capacity<V>(store: &mut Store<V>, shared: &Arc<Shared<V>>, limit: usize, incoming_key: &str)
where
    V: Send + 'static,
{
    if limit == 0 || store.len() < limit || store.get(incoming_key).is_some() {
        return;
    }
    let Some(victim_key) = store.earliest_key().map(str::to_string) else {
        return;
    };
    if let Some(entry) = store.remove(&victim_key) {
        shared.metrics.record_eviction();
        shared.dispatch(DispatchJob::Terminal {
            key: victim_key,
            value: entry.value,
            reason: EvictionReason::EvictedSize,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cache(config: CacheConfig) -> Cache<i32> {
        Cache::new(config)
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = cache(CacheConfig::default());
        cache.set("a", 1).unwrap();
        assert_eq!(cache.get("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_missing_without_loader_is_not_found() {
        let cache = cache(CacheConfig::default());
        assert!(matches!(cache.get("missing").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn remove_twice_yields_not_found_second_time() {
        let cache = cache(CacheConfig::default());
        cache.set("a", 1).unwrap();
        assert!(cache.remove("a").is_ok());
        assert!(matches!(cache.remove("a"), Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn close_twice_yields_closed_second_time() {
        let cache: Cache<i32> = cache(CacheConfig::default());
        assert!(cache.close().await.is_ok());
        assert!(matches!(cache.close().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn operations_after_close_are_rejected() {
        let cache = cache(CacheConfig::default());
        cache.set("a", 1).unwrap();
        cache.close().await.unwrap();

        assert!(matches!(cache.set("b", 2), Err(Error::Closed)));
        assert!(matches!(cache.get("a").await, Err(Error::Closed)));
        assert_eq!(cache.count(), 0);
    }

    #[tokio::test]
    async fn size_limit_evicts_soonest_to_expire() {
        let config = CacheConfig::builder()
            .ttl(Duration::from_secs(3600))
            .cache_size_limit(1)
            .build();
        let cache = cache(config);

        let evicted = Arc::new(Mutex::new(Vec::new()));
        let evicted_cb = evicted.clone();
        cache.set_expiration_reason_callback(move |key, reason, _value| {
            evicted_cb.lock().push((key.to_string(), reason));
        });

        cache.set("one", 1).unwrap();
        cache.set("two", 2).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.count(), 1);
        assert!(cache.get("two").await.is_ok());

        let log = evicted.lock().clone();
        assert_eq!(log, vec![("one".to_string(), EvictionReason::EvictedSize)]);
    }

    #[tokio::test(start_paused = true)]
    async fn expiration_fires_reason_callback() {
        let config = CacheConfig::builder().ttl(Duration::from_millis(1)).build();
        let cache = cache(config);

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let reasons_cb = reasons.clone();
        cache.set_expiration_reason_callback(move |key, reason, _v| {
            reasons_cb.lock().push((key.to_string(), reason));
        });

        cache.set("one", 1).unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            reasons.lock().clone(),
            vec![("one".to_string(), EvictionReason::Expired)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn check_expiration_false_retains_entry_and_does_not_block_others() {
        let config = CacheConfig::builder().ttl(Duration::from_millis(1)).build();
        let cache = cache(config);

        cache.set_check_expiration_callback(|key, _v| key != "a");

        let expired = Arc::new(Mutex::new(Vec::new()));
        let expired_cb = expired.clone();
        cache.set_expiration_callback(move |key, _v| {
            expired_cb.lock().push(key.to_string());
        });

        cache.set("a", 1).unwrap();
        cache.set("b", 2).unwrap();
        cache.set("c", 3).unwrap();
        cache.set("d", 4).unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;

        let mut fired = expired.lock().clone();
        fired.sort();
        assert_eq!(fired, vec!["b".to_string(), "c".to_string(), "d".to_string()]);
        assert_eq!(cache.count(), 1);
    }

    #[tokio::test]
    async fn per_entry_ttl_overrides_global_ttl() {
        let config = CacheConfig::builder().ttl(Duration::from_millis(50)).build();
        let cache = cache(config);

        cache
            .set_with_ttl("k", 1, Ttl::After(Duration::from_millis(100)))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(cache.get("k").await, Err(Error::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_extension_on_hit_keeps_entry_alive_indefinitely() {
        let config = CacheConfig::builder().ttl(Duration::from_millis(100)).build();
        let cache = cache(config);
        cache.set("test", 1).unwrap();

        for _ in 0..30 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
            assert!(cache.get("test").await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn skip_ttl_extension_on_hit_lets_entry_expire() {
        let config = CacheConfig::builder().ttl(Duration::from_millis(100)).build();
        let cache = cache(config);
        cache.set_skip_ttl_extension_on_hit(true);
        cache.set("test", 1).unwrap();

        let mut saw_not_found = false;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
            if cache.get("test").await.is_err() {
                saw_not_found = true;
                break;
            }
        }
        assert!(saw_not_found, "entry should expire within a few TTL periods once hits stop extending it");
    }

    #[tokio::test]
    async fn single_flight_loader_runs_once_for_concurrent_misses() {
        let cache: Cache<i32> = cache(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let load_calls = calls.clone();
        cache.set_loader(move |_key: &str| {
            let calls = load_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok((42, Ttl::Default))
            }
        });

        let cache = Arc::new(cache);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get("k").await.unwrap() }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("load failed: boom")]
    struct LoadFailure;

    #[tokio::test]
    async fn loader_error_propagates_verbatim_to_every_subscriber() {
        let cache: Cache<i32> = cache(CacheConfig::default());
        cache.set_loader(|_key: &str| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(Box::new(LoadFailure) as LoaderError)
        });

        let cache = Arc::new(cache);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get("k").await }));
        }

        for h in handles {
            match h.await.unwrap() {
                Err(Error::Loader(err)) => assert_eq!(err.to_string(), "load failed: boom"),
                other => panic!("expected Error::Loader(_), got {other:?}"),
            }
        }

        // A failed load is never cached.
        assert_eq!(cache.count(), 0);
        assert!(matches!(cache.get("k").await, Err(Error::Loader(_))));
    }

    #[tokio::test]
    async fn close_drains_all_outstanding_entries_with_reason_closed() {
        let config = CacheConfig::builder().ttl(Duration::from_secs(360000)).build();
        let cache = cache(config);

        let closed_keys = Arc::new(Mutex::new(Vec::new()));
        let closed_cb = closed_keys.clone();
        cache.set_expiration_reason_callback(move |key, reason, _v| {
            if reason == EvictionReason::Closed {
                closed_cb.lock().push(key.to_string());
            }
        });

        cache.set("1", 1).unwrap();
        cache.set("2", 2).unwrap();
        cache.set("3", 3).unwrap();

        cache.close().await.unwrap();

        let mut keys = closed_keys.lock().clone();
        keys.sort();
        assert_eq!(keys, vec!["1".to_string(), "2".to_string(), "3".to_string()]);
    }
}
