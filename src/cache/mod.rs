//! Caching layer for list and detail responses.
//!
//! This module provides a resource-agnostic cache that:
//! - Keys entries by resource identity plus serialized query parameters
//! - Keeps a fast in-memory tier in front of a durable SQLite tier
//! - Expires entries by TTL and invalidates them by key, pattern or endpoint
//! - Degrades to memory-only caching when the durable tier fails

pub mod key;
pub mod storage;
pub mod store;

pub use key::{cache_key, item_key};
pub use store::CacheStore;
