//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The task panicked or was torn down before producing a result.
    #[error("queued task aborted before completing")]
    TaskAborted,
}
