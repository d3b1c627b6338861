//! Error type for task registry operations.

use std::path::PathBuf;

use thiserror::Error;

use super::TaskId;
use crate::fetch::FetchError;
use crate::sink::SinkError;

/// Errors returned by [`TaskRegistry`](super::TaskRegistry) operations.
///
/// Every failure is scoped to the operation that raised it; none of them
/// leave the registry in an unusable state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskError {
    /// Every admission slot is held by an active task. Retry later.
    #[error("server is busy: {max} tasks are already active")]
    Admission {
        /// Configured number of admission slots.
        max: usize,
    },

    /// The archive for a new task could not be opened. No slot was kept.
    #[error("cannot open archive at {}: {reason}", path.display())]
    Location {
        /// Resolved archive path.
        path: PathBuf,
        /// Why the location was rejected.
        reason: String,
    },

    /// No task with this identity exists.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The file request is malformed or names an unsupported extension.
    #[error("invalid file request: {0}")]
    Validation(String),

    /// The task already holds its full quota of files.
    #[error("task {id} already has the maximum of {max} files")]
    Quota {
        /// Task identity.
        id: TaskId,
        /// Files per task.
        max: usize,
    },

    /// The task already stores an entry with this name and extension.
    #[error("task {id} already contains {entry}")]
    Duplicate {
        /// Task identity.
        id: TaskId,
        /// Entry name inside the archive.
        entry: String,
    },

    /// The task already has its maximum number of additions in flight.
    #[error("at most {max} files may be processed concurrently for task {id}")]
    Busy {
        /// Task identity.
        id: TaskId,
        /// Concurrent additions per task.
        max: usize,
    },

    /// Fetching the file failed. The task state did not advance.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Fetch failure.
        #[source]
        source: FetchError,
    },

    /// Writing the file into the archive failed. The task state did not
    /// advance.
    #[error("failed to add {entry} to the archive of task {id}: {source}")]
    Write {
        /// Task identity.
        id: TaskId,
        /// Entry name inside the archive.
        entry: String,
        /// Sink failure.
        #[source]
        source: SinkError,
    },

    /// The final file was stored but the archive could not be finalized.
    ///
    /// The task is still marked completed and its admission slot released.
    #[error("task {id} is complete but its archive could not be finalized: {source}")]
    Finalize {
        /// Task identity.
        id: TaskId,
        /// Sink failure.
        #[source]
        source: SinkError,
    },
}

impl TaskError {
    /// Stable machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Admission { .. } => "admission",
            Self::Location { .. } => "location",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Quota { .. } => "quota",
            Self::Duplicate { .. } => "duplicate",
            Self::Busy { .. } => "busy",
            Self::Fetch { .. } => "fetch",
            Self::Write { .. } => "write",
            Self::Finalize { .. } => "finalize",
        }
    }

    /// Returns `true` if repeating the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Admission { .. } | Self::Busy { .. } | Self::Fetch { .. } | Self::Write { .. }
        )
    }
}
