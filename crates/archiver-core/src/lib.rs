//! archiver-core - bounded-concurrency archive task registry
//!
//! A *task* collects a fixed number of remotely fetched files into one zip
//! archive. This crate provides the pieces the daemon wires together:
//!
//! - [`task`]: the [`TaskRegistry`], task model, and request validation
//! - [`sink`]: the append-then-finalize [`ArchiveSink`]
//! - [`fetch`]: the [`Fetcher`] capability with HTTP and in-memory backends
//! - [`config`]: TOML configuration for limits, fetch, and server settings
//!
//! # Runtime Requirements
//!
//! [`TaskRegistry::add_file_to_task`] uses `tokio::task::spawn_blocking` for
//! archive writes and must run inside a Tokio runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use archiver_core::{ArchiveLocation, HttpFetcher, LimitsConfig, TaskRegistry};
//!
//! let fetcher = Arc::new(HttpFetcher::new(&Default::default())?);
//! let registry = TaskRegistry::new(LimitsConfig::default(), fetcher);
//!
//! let id = registry.create_task(&ArchiveLocation::new("/tmp", "photos"))?;
//! registry.add_file_to_task(id, "https://example.com/cat.png", "cat").await?;
//! println!("{:?}", registry.task_status(id)?.status);
//! ```

pub mod config;
pub mod fetch;
pub mod sink;
pub mod task;

pub use config::{ArchiverConfig, ConfigError, FetchConfig, LimitsConfig, ServerConfig};
pub use fetch::{FetchError, Fetcher, HttpFetcher, MemoryFetcher};
pub use sink::{ArchiveSink, SinkError};
pub use task::{
    ALLOWED_EXTENSIONS, ArchiveLocation, FileRequest, TaskError, TaskId, TaskRegistry, TaskStatus,
    TaskView,
};
