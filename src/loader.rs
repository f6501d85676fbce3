//! Pluggable loader trait and the single-flight coalescing protocol.

use async_trait::async_trait;

use crate::entry::Ttl;

/// The error type a [`Loader`] returns: any `std::error::Error`, erased and
/// boxed so the trait stays object-safe without committing the cache to one
/// concrete error type. The cache wraps it verbatim in [`crate::Error::Loader`]
/// via [`crate::Error::from_loader`] rather than reinterpreting it.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// A cache-miss loader.
///
/// Expressed as an `async-trait` object rather than a raw boxed closure so
/// that a [`crate::Cache`] can hold one trait object regardless of the
/// concrete future type the loader returns.
#[async_trait]
pub trait Loader<V>: Send + Sync {
    /// Resolve `key`, returning the value and the TTL to store it with.
    /// Any error type implementing `std::error::Error` converts into
    /// [`LoaderError`] via `?`, and reaches the caller unchanged, wrapped in
    /// [`crate::Error::Loader`].
    async fn load(&self, key: &str) -> Result<(V, Ttl), LoaderError>;
}

#[async_trait]
impl<V, F, Fut> Loader<V> for F
where
    F: Fn(&str) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(V, Ttl), LoaderError>> + Send,
    V: Send,
{
    async fn load(&self, key: &str) -> Result<(V, Ttl), LoaderError> {
        self(key).await
    }
}
