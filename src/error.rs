use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by batch functions.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Shared form of a [`BoxError`], cloned out to every waiter of a task.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Errors surfaced by the aggregator and delivered to waiting tasks.
///
/// `BatchError` is `Clone` because a single batch-level failure is broadcast to every unresolved
/// task of the batch, and every waiter of a task observes the same error.
#[derive(Error, Debug, Clone)]
pub enum BatchError {
    /// The aggregator was built without a batch function.
    #[error("no batch function configured")]
    MissingBatchFunction,

    /// `start` was called outside of a tokio runtime.
    #[error("aggregator must be started from within a tokio runtime")]
    NoRuntime,

    /// The batch function returned an error for the whole batch.
    #[error("batch function failed: {0}")]
    Batch(SharedError),

    /// The batch function failed this particular item.
    #[error("item failed: {0}")]
    Item(SharedError),

    /// The batch function panicked before resolving this item.
    #[error("batch function panicked")]
    Panicked,

    /// The aggregator was closed before the item could be processed.
    #[error("aggregator is closed")]
    Closed,
}

impl BatchError {
    pub(crate) fn batch(err: BoxError) -> Self {
        BatchError::Batch(Arc::from(err))
    }

    pub(crate) fn item(err: BoxError) -> Self {
        BatchError::Item(Arc::from(err))
    }
}
