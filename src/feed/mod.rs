//! The feed surface: rendering, reconciliation, comment threads, user
//! actions and the periodic refresh loop.

pub mod actions;
pub mod reconciler;
pub mod render;
pub mod scheduler;
pub mod stickers;
pub mod thread;
pub mod types;

pub use actions::{ActionError, Actions};
pub use reconciler::{FeedView, ReconcileOutcome};
pub use scheduler::Scheduler;
pub use stickers::{StickerCatalog, StickerTab};
pub use thread::{ThreadError, ThreadManager, ThreadState};
pub use types::{CommentItem, FeedItem, StickerRef};
