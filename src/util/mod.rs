//! Link detection and the TLD validation list behind it.

pub mod linkify;
pub mod tld;

pub use linkify::{segments, Segment};
pub use tld::{CachedTlds, TldCacheStore, TldError, TldList};
