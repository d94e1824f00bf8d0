//! `cache` crate — a keyed store with per-entry TTL and LRU eviction.
//!
//! Enrichment-style blocks use one shared [`Cache`] per process to avoid
//! re-issuing identical external requests.  Keys are usually produced by
//! [`fingerprint`], which hashes a JSON request independently of the order
//! of its object keys.

pub mod config;
pub mod fingerprint;
pub mod memoize;
pub mod store;

pub use config::CacheConfig;
pub use fingerprint::{fingerprint, fingerprint_with};
pub use memoize::{memoize, Memoized};
pub use store::{Cache, CacheStats, MAX_TTL};
