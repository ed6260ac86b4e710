//! Serialized mutation queue for the overlay tree.
//!
//! The host page's own rendering framework mutates its subtrees on its own
//! schedule, so all of the engine's structural writes funnel through a single
//! worker task: strictly FIFO, one operation at a time, with a yield to the
//! runtime between operations so host-side work can interleave. Each
//! operation resolves or rejects independently; a failing operation never
//! blocks the ones behind it.

use super::tree::{DomError, DomTree, NodeId};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Shared handle to the overlay tree.
///
/// The lock is held only for the duration of a synchronous mutation or read,
/// never across an await point.
pub type SharedTree = Arc<RwLock<DomTree>>;

type AsyncOp = Box<dyn FnOnce(SharedTree) -> BoxFuture<'static, Result<(), DomError>> + Send>;

struct Pending {
    run: AsyncOp,
    done: oneshot::Sender<Result<(), DomError>>,
}

/// Single-consumer serialized task runner for overlay-tree writes.
pub struct MutationQueue {
    tx: mpsc::UnboundedSender<Pending>,
    tree: SharedTree,
    worker: JoinHandle<()>,
}

impl MutationQueue {
    pub fn new(tree: SharedTree) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Pending>();
        let worker_tree = Arc::clone(&tree);
        let worker = tokio::spawn(async move {
            while let Some(pending) = rx.recv().await {
                let result = (pending.run)(Arc::clone(&worker_tree)).await;
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "queued mutation failed");
                }
                // Receiver may have been dropped; the result is then discarded.
                let _ = pending.done.send(result);
                // Let the host event loop catch up between operations.
                tokio::task::yield_now().await;
            }
        });
        Self { tx, tree, worker }
    }

    pub fn tree(&self) -> SharedTree {
        Arc::clone(&self.tree)
    }

    /// Submits an asynchronous operation. Submission happens immediately (the
    /// operation's queue position is fixed by the time this returns); awaiting
    /// the returned future yields the operation's own result.
    pub fn enqueue_op<F, Fut>(
        &self,
        op: F,
    ) -> impl std::future::Future<Output = Result<(), DomError>>
    where
        F: FnOnce(SharedTree) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), DomError>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let pending = Pending {
            run: Box::new(move |tree| op(tree).boxed()),
            done: done_tx,
        };
        let sent = self.tx.send(pending).is_ok();
        async move {
            if !sent {
                return Err(DomError::QueueClosed);
            }
            done_rx.await.map_err(|_| DomError::QueueClosed)?
        }
    }

    /// Submits a synchronous tree mutation.
    pub fn enqueue<F>(&self, mutate: F) -> impl std::future::Future<Output = Result<(), DomError>>
    where
        F: FnOnce(&mut DomTree) -> Result<(), DomError> + Send + 'static,
    {
        self.enqueue_op(move |tree| async move {
            let mut guard = tree.write();
            mutate(&mut guard)
        })
    }

    /// Like [`enqueue`](Self::enqueue), but resolves to
    /// [`DomError::Detached`] without running the mutation if `target` is no
    /// longer attached when the operation reaches the front of the queue.
    pub fn enqueue_on<F>(
        &self,
        target: NodeId,
        mutate: F,
    ) -> impl std::future::Future<Output = Result<(), DomError>>
    where
        F: FnOnce(&mut DomTree) -> Result<(), DomError> + Send + 'static,
    {
        self.enqueue(move |tree| {
            if !tree.is_attached(target) {
                return Err(DomError::Detached);
            }
            mutate(tree)
        })
    }

    /// Stops the worker. Pending operations resolve to `QueueClosed`.
    pub fn shutdown(&self) {
        self.worker.abort();
    }
}
