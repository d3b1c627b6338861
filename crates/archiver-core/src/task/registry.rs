//! Task registry with nested admission limits.
//!
//! # Locking
//!
//! One synchronous mutex (the registry state) guards the task map and every
//! task's status, file list, and count. It is held only for bookkeeping and
//! never across a fetch or an archive write.
//!
//! Each task's sink sits behind its own mutex. The commit step of a file
//! addition holds the sink lock for its whole duration and takes the state
//! lock briefly inside it, so the lock order is always sink → state. Nothing
//! takes them in the opposite order.
//!
//! # Invariants
//!
//! - [INV-TR-001] At most `max_active_tasks` tasks are `created` or `running`.
//!   Each active task holds exactly one admission permit.
//! - [INV-TR-002] A task's completed count never exceeds
//!   `max_files_per_task`; the quota is re-checked under the sink lock
//!   before every write.
//! - [INV-TR-003] The sink is finalized exactly once, by the addition that
//!   moves the count to the quota. That addition is also the only place an
//!   admission permit is returned.
//! - [INV-TR-004] The archive link is exposed only for `completed` tasks.
//! - [INV-TR-005] Per-task file slots are RAII permits and are released on
//!   every exit path, including a dropped (timed-out) caller.
//! - [INV-TR-006] Entry names are unique within a task's archive; the check
//!   is repeated under the sink lock before every write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{ArchiveLocation, FileRequest, TaskError, TaskId, TaskStatus, TaskView};
use crate::config::LimitsConfig;
use crate::fetch::Fetcher;
use crate::sink::{ArchiveSink, SinkError};

/// Owns every task and enforces the global and per-task limits.
///
/// Build one registry at startup and share it behind an [`Arc`]; all methods
/// take `&self`.
pub struct TaskRegistry {
    limits: LimitsConfig,
    archive_root: Option<PathBuf>,
    admission: Arc<Semaphore>,
    state: Arc<Mutex<RegistryState>>,
    fetcher: Arc<dyn Fetcher>,
    open_sink: SinkOpener,
}

/// Creates the sink for a resolved archive path.
type SinkOpener = fn(&Path) -> Result<ArchiveSink, SinkError>;

#[derive(Default)]
struct RegistryState {
    last_id: u64,
    tasks: HashMap<TaskId, Task>,
}

struct Task {
    status: TaskStatus,
    /// Entry names stored so far, in storage order.
    files: Vec<String>,
    completed: usize,
    archive_path: PathBuf,
    created_at: DateTime<Utc>,
    sink: Arc<Mutex<ArchiveSink>>,
    file_slots: Arc<Semaphore>,
    /// Held from creation until completion; dropping it frees the slot.
    admission: Option<OwnedSemaphorePermit>,
}

impl TaskRegistry {
    /// Create a registry with the given limits and fetch capability.
    #[must_use]
    pub fn new(limits: LimitsConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            admission: Arc::new(Semaphore::new(limits.max_active_tasks)),
            limits,
            archive_root: None,
            state: Arc::new(Mutex::new(RegistryState::default())),
            fetcher,
            open_sink: |path| ArchiveSink::open(path),
        }
    }

    #[cfg(test)]
    fn with_sink_opener(mut self, open_sink: SinkOpener) -> Self {
        self.open_sink = open_sink;
        self
    }

    /// Resolve relative archive directories against `root`.
    #[must_use]
    pub fn with_archive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.archive_root = Some(root.into());
        self
    }

    /// Limits this registry enforces.
    #[must_use]
    pub const fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Number of tasks currently holding an admission slot.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.limits.max_active_tasks - self.admission.available_permits()
    }

    /// Number of admission slots currently free.
    #[must_use]
    pub fn available_task_slots(&self) -> usize {
        self.admission.available_permits()
    }

    /// Number of tasks ever registered, completed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().tasks.len()
    }

    /// Returns `true` if no task was ever registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a task whose archive is written to `location`.
    ///
    /// Admission is non-blocking: if every slot is taken the call fails at
    /// once. If the archive cannot be opened the slot is released before the
    /// error is returned. A failed attempt still consumes an identity.
    ///
    /// Creating the archive file blocks on the filesystem; no registry lock
    /// is held meanwhile. Async callers should run this on the blocking pool.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Admission`] if `max_active_tasks` tasks are active
    /// - [`TaskError::Location`] if the archive cannot be created
    pub fn create_task(&self, location: &ArchiveLocation) -> Result<TaskId, TaskError> {
        let Ok(permit) = Arc::clone(&self.admission).try_acquire_owned() else {
            warn!(
                max_active_tasks = self.limits.max_active_tasks,
                "task creation rejected: no admission slot"
            );
            return Err(TaskError::Admission {
                max: self.limits.max_active_tasks,
            });
        };

        let id = {
            let mut state = self.lock_state();
            state.last_id += 1;
            TaskId::new(state.last_id)
        };

        let opened = location
            .resolve(self.archive_root.as_deref())
            .and_then(|path| match (self.open_sink)(&path) {
                Ok(sink) => Ok((path, sink)),
                Err(SinkError::Location { source, .. }) => Err(TaskError::Location {
                    path,
                    reason: source.to_string(),
                }),
                Err(other) => Err(TaskError::Location {
                    path,
                    reason: other.to_string(),
                }),
            });
        let (archive_path, sink) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                drop(permit);
                warn!(task_id = %id, error = %error, "task creation failed, slot released");
                return Err(error);
            },
        };

        info!(task_id = %id, archive = %archive_path.display(), "task created");
        self.lock_state().tasks.insert(
            id,
            Task {
                status: TaskStatus::Created,
                files: Vec::new(),
                completed: 0,
                archive_path,
                created_at: Utc::now(),
                sink: Arc::new(Mutex::new(sink)),
                file_slots: Arc::new(Semaphore::new(self.limits.max_concurrent_files_per_task)),
                admission: Some(permit),
            },
        );
        Ok(id)
    }

    /// Snapshot the state of a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for an unknown identity.
    pub fn task_status(&self, id: TaskId) -> Result<TaskView, TaskError> {
        let state = self.lock_state();
        let task = state.tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        let in_flight =
            self.limits.max_concurrent_files_per_task - task.file_slots.available_permits();

        Ok(TaskView {
            id,
            status: task.status,
            files: task.files.clone(),
            completed_files: task.completed,
            in_flight_files: in_flight,
            archive_link: (task.status == TaskStatus::Completed)
                .then(|| task.archive_path.display().to_string()),
            created_at: task.created_at,
        })
    }

    /// Fetch `source` and store it in the task's archive as `name` plus the
    /// source's extension.
    ///
    /// Checks run in this order, each with its own error: extension and name
    /// validation (before any lookup), task lookup, quota, entry name
    /// uniqueness, then a non-blocking per-task slot. The fetch runs without any registry lock
    /// held. Once the fetch has succeeded, writing and bookkeeping run to
    /// completion even if the caller stops waiting.
    ///
    /// Adding the final file finalizes the archive, marks the task
    /// completed, and frees its admission slot.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Validation`] for an unsupported extension or bad name
    /// - [`TaskError::NotFound`] for an unknown task
    /// - [`TaskError::Quota`] if the task already holds all its files
    /// - [`TaskError::Duplicate`] if the task already stores an entry with
    ///   the same name and extension
    /// - [`TaskError::Busy`] if the task's concurrent additions are exhausted
    /// - [`TaskError::Fetch`] / [`TaskError::Write`] on I/O failure; the task
    ///   state does not advance
    /// - [`TaskError::Finalize`] if the final file was stored but the archive
    ///   could not be closed
    pub async fn add_file_to_task(
        &self,
        id: TaskId,
        source: &str,
        name: &str,
    ) -> Result<(), TaskError> {
        let request = FileRequest::parse(source, name).inspect_err(|error| {
            warn!(task_id = %id, error = %error, "file request rejected");
        })?;

        let entry = request.entry_name();
        let (sink, file_slots) = {
            let mut state = self.lock_state();
            let task = state.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
            if task.completed >= self.limits.max_files_per_task {
                return Err(TaskError::Quota {
                    id,
                    max: self.limits.max_files_per_task,
                });
            }
            task.status = TaskStatus::Running;
            if task.files.contains(&entry) {
                warn!(task_id = %id, entry = %entry, "file addition rejected: duplicate entry");
                return Err(TaskError::Duplicate { id, entry });
            }
            (Arc::clone(&task.sink), Arc::clone(&task.file_slots))
        };

        let Ok(slot) = file_slots.try_acquire_owned() else {
            warn!(task_id = %id, url = %request.url(), "file addition rejected: task busy");
            return Err(TaskError::Busy {
                id,
                max: self.limits.max_concurrent_files_per_task,
            });
        };
        debug!(task_id = %id, url = %request.url(), "file slot acquired");

        // Dropping this future here releases `slot` and leaves the task as is.
        let contents = self
            .fetcher
            .fetch(request.url())
            .await
            .map_err(|source| {
                warn!(task_id = %id, url = %request.url(), error = %source, "fetch failed");
                TaskError::Fetch {
                    url: request.url().to_string(),
                    source,
                }
            })?;

        let state = Arc::clone(&self.state);
        let max_files = self.limits.max_files_per_task;
        let commit = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            commit_file(&state, &sink, id, &request, &contents, max_files)
        });

        match commit.await {
            Ok(result) => result,
            Err(join_error) => Err(TaskError::Write {
                id,
                entry: entry.clone(),
                source: SinkError::Write {
                    entry,
                    message: join_error.to_string(),
                },
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        lock(&self.state)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("limits", &self.limits)
            .field("archive_root", &self.archive_root)
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write one fetched file and record it, finalizing on the last one.
///
/// Runs on the blocking pool with the task's sink locked throughout, so
/// concurrent additions to the same task commit one at a time.
fn commit_file(
    state: &Mutex<RegistryState>,
    sink: &Mutex<ArchiveSink>,
    id: TaskId,
    request: &FileRequest,
    contents: &Bytes,
    max_files: usize,
) -> Result<(), TaskError> {
    let mut sink = lock(sink);

    // Another addition may have filled the task, or stored the same entry,
    // while this one was fetching.
    let entry = request.entry_name();
    {
        let state = lock(state);
        let Some(task) = state.tasks.get(&id) else {
            return Err(TaskError::NotFound(id));
        };
        if task.completed >= max_files {
            return Err(TaskError::Quota { id, max: max_files });
        }
        if task.files.contains(&entry) {
            return Err(TaskError::Duplicate { id, entry });
        }
    }

    sink.add_entry(&entry, contents).map_err(|source| {
        warn!(task_id = %id, entry = %entry, error = %source, "archive write failed");
        TaskError::Write {
            id,
            entry: entry.clone(),
            source,
        }
    })?;

    let reached_quota = {
        let mut state = lock(state);
        let Some(task) = state.tasks.get_mut(&id) else {
            return Err(TaskError::NotFound(id));
        };
        task.files.push(entry.clone());
        task.completed += 1;
        debug!(task_id = %id, entry = %entry, completed = task.completed, "file stored");
        task.completed == max_files
    };
    if !reached_quota {
        return Ok(());
    }

    // Finalize before publishing `completed` so the link never points at a
    // partial archive.
    let finalized = sink.finalize();
    drop(sink);

    let released = {
        let mut state = lock(state);
        state.tasks.get_mut(&id).and_then(|task| {
            task.status = TaskStatus::Completed;
            task.admission.take()
        })
    };
    drop(released);

    match finalized {
        Ok(()) => {
            info!(task_id = %id, files = max_files, "task completed, archive finalized");
            Ok(())
        },
        Err(source) => {
            warn!(task_id = %id, error = %source, "task completed but archive finalization failed");
            Err(TaskError::Finalize { id, source })
        },
    }
}
