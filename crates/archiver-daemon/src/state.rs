//! Shared state handed to every request handler.

use std::sync::Arc;
use std::time::Duration;

use archiver_core::TaskRegistry;

/// State shared by all handlers through axum's `State` extractor.
///
/// Cloning is cheap: the registry is reference-counted and every clone
/// observes the same tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    registry: Arc<TaskRegistry>,
    request_timeout: Duration,
}

impl AppState {
    /// Wrap a registry; registry calls that await are bounded by
    /// `request_timeout`.
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
        }
    }

    /// The task registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Deadline applied to a single request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}
