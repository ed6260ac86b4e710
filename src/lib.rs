//! Live view-synchronization engine for the PlayEntry community board.
//!
//! The engine runs headless behind a thin injection shim: it mirrors the
//! board's post feed into an overlay node tree, keeps that tree in step with
//! the server through periodic reconciliation, and carries user actions
//! (likes, comments, edits, deletes) with apply-after-confirm semantics.
//! All structural writes funnel through one serialized mutation queue so the
//! host page's own rendering never observes a partial update.

pub mod auth;
pub mod config;
pub mod dom;
pub mod engine;
pub mod feed;
pub mod net;
pub mod page;
pub mod util;

pub use auth::{HostPage, TokenStore};
pub use config::Config;
pub use engine::{Engine, EngineError};
