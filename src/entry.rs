//! Per-entry record and TTL/expiration types.

use std::time::{Duration, Instant};

/// Per-entry time-to-live setting: a three-way enum instead of a signed
/// duration with magic sentinel values, so "use the global TTL" and "never
/// expire" are distinct states the type system can check rather than `0`
/// and "negative" conventions a caller has to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Use the cache's configured global TTL. If no global TTL is
    /// configured, behaves like [`Ttl::Forever`].
    Default,
    /// This entry never expires by time.
    Forever,
    /// This entry expires `Duration` after insertion, regardless of the
    /// global TTL.
    After(Duration),
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::Default
    }
}

/// A entry's absolute expiration time, or a sentinel meaning "never".
///
/// `Never` sorts after every `At(_)` so that the priority heap never
/// schedules a wakeup for an entry that cannot expire by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiresAt {
    At(Instant),
    Never,
}

impl ExpiresAt {
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        matches!(self, ExpiresAt::At(at) if *at <= now)
    }
}

impl PartialOrd for ExpiresAt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExpiresAt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering::*;
        match (self, other) {
            (ExpiresAt::At(a), ExpiresAt::At(b)) => a.cmp(b),
            (ExpiresAt::Never, ExpiresAt::Never) => Equal,
            (ExpiresAt::Never, ExpiresAt::At(_)) => Greater,
            (ExpiresAt::At(_), ExpiresAt::Never) => Less,
        }
    }
}

/// A single cached entry.
#[derive(Debug, Clone)]
pub(crate) struct Entry<V> {
    pub(crate) value: V,
    pub(crate) created_at: Instant,
    pub(crate) expires_at: ExpiresAt,
    pub(crate) ttl: Ttl,
    /// Index of this entry's key in the store's heap vector, kept in sync by
    /// every heap mutation so `remove` and re-sift are O(log n).
    pub(crate) heap_index: usize,
}

impl<V> Entry<V> {
    pub(crate) fn new(value: V, created_at: Instant, ttl: Ttl, global_ttl: Option<Duration>) -> Self {
        let expires_at = Self::compute_expires_at(created_at, ttl, global_ttl);
        Self {
            value,
            created_at,
            expires_at,
            ttl,
            heap_index: 0,
        }
    }

    pub(crate) fn compute_expires_at(
        created_at: Instant,
        ttl: Ttl,
        global_ttl: Option<Duration>,
    ) -> ExpiresAt {
        match ttl {
            Ttl::Forever => ExpiresAt::Never,
            Ttl::After(d) => ExpiresAt::At(created_at + d),
            Ttl::Default => match global_ttl {
                Some(d) => ExpiresAt::At(created_at + d),
                None => ExpiresAt::Never,
            },
        }
    }

    /// Effective TTL duration used to extend this entry (TTL extension on
    /// hit, or check-expiration retention). `None` means never-expire.
    pub(crate) fn effective_ttl(&self, global_ttl: Option<Duration>) -> Option<Duration> {
        match self.ttl {
            Ttl::Forever => None,
            Ttl::After(d) => Some(d),
            Ttl::Default => global_ttl,
        }
    }

    /// Extend this entry's expiration from `now` by its effective TTL.
    pub(crate) fn extend_from(&mut self, now: Instant, global_ttl: Option<Duration>) {
        self.expires_at = match self.effective_ttl(global_ttl) {
            Some(d) => ExpiresAt::At(now + d),
            None => ExpiresAt::Never,
        };
    }
}
