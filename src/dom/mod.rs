//! Overlay tree, rendered-entry ledger, and the serialized mutation queue.
//!
//! - [`tree`] - typed node tree with a capability marker separating
//!   overlay-owned nodes from host-owned ones
//! - [`index`] - id → live-node ledger with preserved UI state
//! - [`queue`] - single-consumer FIFO runner for all structural writes

mod index;
mod queue;
mod tree;

pub use index::{EntryNodes, RenderedEntry, RenderedIndex, UiState};
pub use queue::{MutationQueue, SharedTree};
pub use tree::{DomError, DomTree, NodeId, NodeSpec, MARKER_ATTR};
