//! Callback dispatcher: a single task that serializes user callback
//! invocations so they never run under the cache's primary lock and never
//! block a `get`/`set` caller.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Why an entry was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// The entry's TTL elapsed.
    Expired,
    /// The entry was evicted to stay within `cache_size_limit`.
    EvictedSize,
    /// The entry was removed explicitly (`remove`/`purge`).
    Removed,
    /// The cache was closed.
    Closed,
}

type ExpirationCb<V> = dyn Fn(&str, &V) + Send + Sync;
type ReasonCb<V> = dyn Fn(&str, EvictionReason, &V) + Send + Sync;
type CheckExpirationCb<V> = dyn Fn(&str, &V) -> bool + Send + Sync;
type NewItemCb<V> = dyn Fn(&str, &V) + Send + Sync;

/// The user-supplied callback slots. Read-mostly (set rarely via the
/// `Cache` setters, read once per dispatched job), so a `parking_lot::RwLock`
/// separate from the primary store lock is enough.
pub(crate) struct Callbacks<V> {
    pub(crate) expiration: Option<Arc<ExpirationCb<V>>>,
    pub(crate) reason: Option<Arc<ReasonCb<V>>>,
    pub(crate) check_expiration: Option<Arc<CheckExpirationCb<V>>>,
    pub(crate) new_item: Option<Arc<NewItemCb<V>>>,
}

// Written by hand rather than `#[derive(Default)]`: the derive would add a
// spurious `V: Default` bound even though `V` only ever appears behind an
// `Option<Arc<dyn Fn(...)>>`.
impl<V> Default for Callbacks<V> {
    fn default() -> Self {
        Self {
            expiration: None,
            reason: None,
            check_expiration: None,
            new_item: None,
        }
    }
}

/// A unit of work for the dispatcher task.
pub(crate) enum DispatchJob<V> {
    NewItem {
        key: String,
        value: V,
    },
    Terminal {
        key: String,
        value: V,
        reason: EvictionReason,
    },
    CheckExpiration {
        key: String,
        value: V,
        reply: oneshot::Sender<bool>,
    },
}

pub(crate) type DispatchSender<V> = mpsc::UnboundedSender<DispatchJob<V>>;

/// Spawn the dispatcher task. Returns the job sender; dropping every clone
/// of it lets the task drain its queue and exit.
pub(crate) fn spawn<V>(
    callbacks: Arc<RwLock<Callbacks<V>>>,
) -> (DispatchSender<V>, tokio::task::JoinHandle<()>)
where
    V: Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchJob<V>>();

    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                DispatchJob::NewItem { key, value } => {
                    let cb = callbacks.read().new_item.clone();
                    if let Some(cb) = cb {
                        trace!(key, "dispatching new-item callback");
                        cb(&key, &value);
                    }
                }
                DispatchJob::Terminal { key, value, reason } => {
                    let (expiration_cb, reason_cb) = {
                        let guard = callbacks.read();
                        (guard.expiration.clone(), guard.reason.clone())
                    };
                    if reason == EvictionReason::Expired {
                        if let Some(cb) = &expiration_cb {
                            trace!(key, "dispatching expiration callback");
                            cb(&key, &value);
                        }
                    }
                    if let Some(cb) = &reason_cb {
                        trace!(key, ?reason, "dispatching reason callback");
                        cb(&key, reason, &value);
                    }
                }
                DispatchJob::CheckExpiration { key, value, reply } => {
                    let cb = callbacks.read().check_expiration.clone();
                    let verdict = match cb {
                        Some(cb) => cb(&key, &value),
                        None => true,
                    };
                    // The scheduler may have stopped waiting (e.g. on a
                    // racing close); a dropped receiver is not an error.
                    let _ = reply.send(verdict);
                }
            }
        }
    });

    (tx, handle)
}
