//! Task model and the bounded-concurrency task registry.
//!
//! A task accumulates a fixed number of fetched files into one zip archive.
//! The [`TaskRegistry`] owns every task and enforces two nested limits:
//!
//! ```text
//!  TaskRegistry
//!    ├── admission: Semaphore(max_active_tasks)   one permit per active task
//!    └── tasks: Mutex<HashMap<TaskId, Task>>
//!          └── Task
//!                ├── file_slots: Semaphore(max_concurrent_files_per_task)
//!                └── sink: Mutex<ArchiveSink>
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! created ──(first add attempt)──► running ──(quota reached)──► completed
//! ```
//!
//! `completed` is terminal. There is no failed state: a task whose additions
//! keep failing stays `running` and keeps its admission slot.

mod error;
mod registry;
mod request;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::error::TaskError;
pub use self::registry::TaskRegistry;
pub use self::request::{ALLOWED_EXTENSIONS, ARCHIVE_EXTENSION, ArchiveLocation, FileRequest};

/// Identity of a task.
///
/// Identities are assigned in increasing order starting at 1 and are never
/// reused for the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wrap a raw identity.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identity value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, no file addition attempted yet.
    Created,
    /// At least one file addition attempted; quota not reached.
    Running,
    /// Quota reached and archive finalized. Terminal.
    Completed,
}

impl TaskStatus {
    /// Lowercase name used in logs and responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }

    /// Returns `true` while the task holds an admission slot.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    /// Task identity.
    pub id: TaskId,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Archive entry names (`<name>.<extension>`) of successfully added
    /// files, in the order they were stored.
    pub files: Vec<String>,
    /// Number of successfully added files.
    pub completed_files: usize,
    /// Additions currently fetching or writing.
    pub in_flight_files: usize,
    /// Path of the finished archive. `None` until the task is completed.
    pub archive_link: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Completed).ok(),
            Some("\"completed\"".to_string())
        );
        assert_eq!(TaskStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_only_completed_is_inactive() {
        assert!(TaskStatus::Created.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(!TaskStatus::Completed.is_active());
    }

    #[test]
    fn test_task_id_ordering_and_display() {
        assert!(TaskId::new(1) < TaskId::new(2));
        assert_eq!(TaskId::from(42).to_string(), "42");
        assert_eq!(TaskId::new(9).get(), 9);
    }
}
