//! Background expiration task.
//!
//! Sleeps until the soonest-to-expire entry is due, drains everything due at
//! that instant, and re-arms around whatever is now soonest. A `Notify`
//! wakes the task early on TTL extension, size eviction, or close, so it
//! reacts promptly instead of relying solely on the idle poll. When the
//! store holds no expirable entry, it falls back to waking every
//! `empty_delay` so a newly-inserted entry is never stuck behind a missed
//! wake signal.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, trace};

use crate::callback::{DispatchJob, EvictionReason};
use crate::cache::Shared;
use crate::entry::ExpiresAt;

pub(crate) fn spawn<V>(shared: Arc<Shared<V>>) -> tokio::task::JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        run(shared).await;
    })
}

async fn run<V>(shared: Arc<Shared<V>>)
where
    V: Clone + Send + Sync + 'static,
{
    loop {
        let (wait_until, empty_delay) = {
            let store = shared.store.lock();
            if store.closed {
                debug!("scheduler observed closed cache, stopping");
                return;
            }
            let wait_until = match store.peek_earliest() {
                None | Some(ExpiresAt::Never) => None,
                Some(ExpiresAt::At(at)) => Some(at + store.config.delta_delay),
            };
            (wait_until, store.config.empty_delay)
        };

        match wait_until {
            None => {
                trace!(?empty_delay, "scheduler idle, polling for wake signal");
                tokio::select! {
                    _ = time::sleep(empty_delay) => {}
                    _ = shared.wake.notified() => {}
                }
            }
            Some(target) => {
                tokio::select! {
                    _ = time::sleep_until(time::Instant::from_std(target)) => {}
                    _ = shared.wake.notified() => {}
                }
            }
        }

        if shared.store.lock().closed {
            debug!("scheduler observed closed cache after wake, stopping");
            return;
        }

        fire_due_entries(&shared).await;
    }
}

/// Pop and process every entry due at `Instant::now()`, re-arming the
/// in-place-retained ones and dispatching terminal notifications for the
/// rest. A `false` check-expiration verdict on one candidate never halts
/// processing of the remaining candidates.
async fn fire_due_entries<V>(shared: &Arc<Shared<V>>)
where
    V: Clone + Send + Sync + 'static,
{
    let now = Instant::now();

    loop {
        let popped = {
            let mut store = shared.store.lock();
            store.pop_due(now)
        };
        let (key, mut entry) = match popped {
            Some(x) => x,
            None => break,
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = shared.try_dispatch(DispatchJob::CheckExpiration {
            key: key.clone(),
            value: entry.value.clone(),
            reply: reply_tx,
        });

        let should_evict = if sent {
            reply_rx.await.unwrap_or(true)
        } else {
            true
        };

        if should_evict {
            shared.metrics.record_eviction();
            trace!(key, "expiring entry");
            shared.dispatch(DispatchJob::Terminal {
                key,
                value: entry.value,
                reason: EvictionReason::Expired,
            });
        } else {
            trace!(key, "check-expiration retained entry");
            let global_ttl = shared.store.lock().config.ttl;
            entry.extend_from(Instant::now(), global_ttl);
            shared.store.lock().insert(key, entry);
        }
    }

    // The set of entries (and thus the new earliest) may have changed.
    shared.wake.notify_one();
}
