//! Error types returned by [`crate::Cache`].

use std::sync::Arc;

/// Errors produced by cache operations.
///
/// Loader errors are wrapped verbatim (behind an [`Arc`] so the same error
/// can be multicast to every subscriber of a single-flight load) rather than
/// reinterpreted; the cache itself only ever originates [`Error::NotFound`]
/// and [`Error::Closed`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The key is not present in the cache, and either no loader is
    /// configured or the caller asked to skip loading.
    #[error("key not found in cache")]
    NotFound,

    /// The cache has been closed; no further operations are accepted.
    #[error("cache is closed")]
    Closed,

    /// The configured loader function returned an error while resolving a
    /// miss. Propagated verbatim to every subscriber of that load.
    #[error("loader failed: {0}")]
    Loader(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an arbitrary loader error.
    pub fn from_loader<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Loader(Arc::new(err))
    }
}
