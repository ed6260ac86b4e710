//! Remote API access: the retrying fetch client and the named GraphQL
//! operations built on top of it.

mod api;
mod client;

pub use api::{FeedQuery, PagedList, PostRow, StickerRow, StickerTabRow, UserRow};
pub use client::{backoff_delay, ApiClient, ApiError};
