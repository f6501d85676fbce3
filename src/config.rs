//! Configuration of a [`crate::Cache`].

use std::time::Duration;

const DEFAULT_EMPTY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_DELTA_DELAY: Duration = Duration::from_millis(5);

/// Configuration of a [`crate::Cache`].
///
/// Every field here is also exposed as a runtime setter on [`crate::Cache`]
/// (`set_ttl`, `set_cache_size_limit`, `set_skip_ttl_extension_on_hit`), so
/// this type is mainly a convenient bundle for construction; see
/// [`CacheConfigBuilder`] for the fluent form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Global TTL applied to entries whose per-entry [`crate::Ttl`] is
    /// [`crate::Ttl::Default`]. `None` means such entries never expire.
    pub ttl: Option<Duration>,
    /// Maximum number of live entries. `0` means unbounded.
    pub cache_size_limit: usize,
    /// If `true`, a hit does not extend the entry's expiration.
    pub skip_ttl_extension_on_hit: bool,
    /// Delay the scheduler sleeps when the store is empty.
    ///
    /// Defaults to 100ms.
    pub empty_delay: Duration,
    /// Delay added on top of the soonest expiration, to coalesce entries
    /// that expire within a short window into a single wakeup.
    ///
    /// Defaults to 5ms.
    pub delta_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            cache_size_limit: 0,
            skip_ttl_extension_on_hit: false,
            empty_delay: DEFAULT_EMPTY_DELAY,
            delta_delay: DEFAULT_DELTA_DELAY,
        }
    }
}

impl CacheConfig {
    /// Start building a [`CacheConfig`] from defaults.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    ttl: Option<Duration>,
    cache_size_limit: Option<usize>,
    skip_ttl_extension_on_hit: Option<bool>,
    empty_delay: Option<Duration>,
    delta_delay: Option<Duration>,
}

impl CacheConfigBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Set the global TTL applied to entries using [`crate::Ttl::Default`].
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the maximum number of live entries (`0` = unbounded).
    pub fn cache_size_limit(mut self, limit: usize) -> Self {
        self.cache_size_limit = Some(limit);
        self
    }

    /// Skip extending an entry's TTL on a cache hit.
    pub fn skip_ttl_extension_on_hit(mut self, skip: bool) -> Self {
        self.skip_ttl_extension_on_hit = Some(skip);
        self
    }

    /// Delay the scheduler sleeps when the store is empty.
    pub fn empty_delay(mut self, empty_delay: Duration) -> Self {
        self.empty_delay = Some(empty_delay);
        self
    }

    /// Delay added on top of the soonest expiration to coalesce wakeups.
    pub fn delta_delay(mut self, delta_delay: Duration) -> Self {
        self.delta_delay = Some(delta_delay);
        self
    }

    /// Build the [`CacheConfig`], filling unset fields with defaults.
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();
        CacheConfig {
            ttl: self.ttl.or(defaults.ttl),
            cache_size_limit: self.cache_size_limit.unwrap_or(defaults.cache_size_limit),
            skip_ttl_extension_on_hit: self
                .skip_ttl_extension_on_hit
                .unwrap_or(defaults.skip_ttl_extension_on_hit),
            empty_delay: self.empty_delay.unwrap_or(defaults.empty_delay),
            delta_delay: self.delta_delay.unwrap_or(defaults.delta_delay),
        }
    }
}
