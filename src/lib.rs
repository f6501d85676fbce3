//! # ttl-cache
//!
//! An in-memory key-value cache with per-entry time-to-live (TTL), bounded
//! capacity, callback-driven eviction notification, and a single-flight
//! loader for cache misses.
//!
//! This crate provides a [`Cache`] type backed by an indexed min-heap
//! ordered by expiration time, a dedicated scheduler task that expires
//! entries in wall-clock order, and a dedicated dispatcher task that runs
//! user callbacks off the hot path. Creating a [`Cache`] spawns both tasks;
//! [`Cache::close`] tears them down cleanly.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use ttl_cache::{Cache, CacheConfig};
//!
//! # async fn run() {
//! let cache: Cache<String> = Cache::new(CacheConfig::builder().ttl(Duration::from_secs(60)).build());
//! cache.set("key", "value".to_string()).unwrap();
//! assert_eq!(cache.get("key").await.unwrap(), "value");
//! cache.close().await.unwrap();
//! # }
//! ```
//!
//! ### Key eviction
//! A background scheduler task sleeps until the soonest-to-expire entry is
//! due, fires eviction notifications for everything due (subject to the
//! check-expiration callback), and re-arms. Capacity-driven eviction removes
//! the soonest-to-expire entry when a fresh key would exceed
//! `cache_size_limit`, not the least-recently-used one — see the crate's
//! `Non-goals` in its design notes for why this is not an LRU cache.
//!
//! ### Cache misses
//! If a loader is configured via [`Cache::set_loader`], concurrent misses
//! for the same key are coalesced into a single loader invocation; every
//! waiting caller receives the same result.

mod cache;
mod callback;
mod config;
mod entry;
mod error;
mod loader;
mod metrics;
mod scheduler;
mod store;

pub use cache::Cache;
pub use callback::EvictionReason;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::Ttl;
pub use error::Error;
pub use loader::{Loader, LoaderError};
pub use metrics::MetricsSnapshot;
