//! Error taxonomy of the channel-state write path.
//!
//! Operations return [`anyhow::Result`]; the typed [`ChannelStateError`] travels inside the
//! `anyhow::Error` and can be recovered with `downcast_ref`. Causes that are fanned out to more
//! than one observer (a closing executor cancelling every queued request, a failing dispatcher
//! failing every result handle) are shared as [`FailureCause`].

use std::fmt;
use std::sync::Arc;

use crate::buffer::DataType;
use crate::checkpoint::RequestState;
use crate::types::CheckpointId;

/// Reference-counted failure cause.
///
/// Clones point at the same underlying error, so identity survives propagation and can be
/// checked with [`FailureCause::ptr_eq`].
#[derive(Clone)]
pub struct FailureCause(Arc<anyhow::Error>);

impl FailureCause {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for FailureCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<ChannelStateError> for FailureCause {
    fn from(error: ChannelStateError) -> Self {
        Self::new(error)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelStateError {
    #[error("channel state write executor of {task} has not been started")]
    NotStarted { task: String },

    #[error("channel state write executor of {task} has already been started")]
    AlreadyStarted { task: String },

    /// Submission after `close()` began, and the cause handed to requests discarded on close.
    #[error("channel state write executor of {task} is closed")]
    Closed { task: String },

    #[error("channel state write executor of {task} is not running")]
    NotRunning {
        task: String,
        #[source]
        cause: Option<FailureCause>,
    },

    /// Replay of the dispatch failure recorded by the worker.
    #[error("channel state write of {task} failed")]
    DispatchFailed {
        task: String,
        #[source]
        cause: FailureCause,
    },

    #[error("dispatching {request} panicked: {message}")]
    DispatchPanicked { request: String, message: String },

    #[error("{request}: expected a data buffer, got {data_type:?}")]
    InvalidBuffer { request: String, data_type: DataType },

    #[error("no channel state writer for checkpoint {checkpoint_id} ({request})")]
    WriterNotFound {
        checkpoint_id: CheckpointId,
        request: String,
    },

    #[error("channel state writer for checkpoint {checkpoint_id} already exists")]
    WriterAlreadyExists { checkpoint_id: CheckpointId },

    #[error("{request} is {actual:?}, expected {expected:?}")]
    IllegalRequestState {
        request: String,
        expected: RequestState,
        actual: RequestState,
    },

    #[error("checkpoint {checkpoint_id} is no longer in progress")]
    CheckpointNotInProgress { checkpoint_id: CheckpointId },

    #[error("checkpoint {checkpoint_id} was aborted")]
    CheckpointAborted {
        checkpoint_id: CheckpointId,
        #[source]
        cause: FailureCause,
    },

    #[error("channel state of checkpoint {checkpoint_id} already completed for {side}")]
    ChannelAlreadyComplete {
        checkpoint_id: CheckpointId,
        side: &'static str,
    },

    #[error("too many checkpoints in flight: {in_flight} (max {max})")]
    TooManyCheckpoints { in_flight: usize, max: usize },

    #[error("write result for checkpoint {checkpoint_id} already present")]
    ResultAlreadyPresent { checkpoint_id: CheckpointId },

    #[error("no write result for checkpoint {checkpoint_id}")]
    ResultNotFound { checkpoint_id: CheckpointId },
}

impl ChannelStateError {
    /// Whether the error reports a broken pipeline invariant rather than a request-level problem.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::IllegalRequestState { .. } | Self::WriterAlreadyExists { .. }
        )
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
