//! Validated inputs for task creation and file addition.

use std::path::{Path, PathBuf};

use url::Url;

use super::TaskError;

/// File extensions accepted for archiving, lowercase and without the dot.
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "pdf"];

/// File extension appended to every archive name.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Where a task's archive is written: `<directory>/<name>.zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLocation {
    directory: PathBuf,
    name: String,
}

impl ArchiveLocation {
    /// Describe an archive named `name` inside `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
        }
    }

    /// Directory as supplied by the caller.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Archive base name as supplied by the caller.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the archive file path.
    ///
    /// Relative directories are joined onto `root` when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Location`] if the name is empty, a dot path, or
    /// contains a path separator.
    pub fn resolve(&self, root: Option<&Path>) -> Result<PathBuf, TaskError> {
        let directory = match root {
            Some(root) if self.directory.is_relative() => root.join(&self.directory),
            _ => self.directory.clone(),
        };
        let file_name = format!("{}.{ARCHIVE_EXTENSION}", self.name);
        let path = directory.join(&file_name);

        let name = self.name.trim();
        let reason = if name.is_empty() {
            Some("archive name must not be empty")
        } else if name == "." || name == ".." {
            Some("archive name must not be a dot path")
        } else if has_separator(&self.name) {
            Some("archive name must not contain path separators")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(TaskError::Location {
                path,
                reason: reason.to_string(),
            }),
            None => Ok(path),
        }
    }
}

/// A file addition that passed syntactic validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    url: Url,
    name: String,
    extension: String,
}

impl FileRequest {
    /// Validate a fetch source and the caller's desired file name.
    ///
    /// The extension is taken from the last segment of the URL path and must
    /// be one of [`ALLOWED_EXTENSIONS`] (case-insensitive). This check does
    /// not depend on any task state.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Validation`] if the URL is not absolute http(s),
    /// the extension is missing or unsupported, or the name is empty or
    /// contains a path separator.
    pub fn parse(source: &str, name: &str) -> Result<Self, TaskError> {
        let url = Url::parse(source.trim())
            .map_err(|e| TaskError::Validation(format!("malformed URL {source:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TaskError::Validation(format!(
                "unsupported URL scheme {:?}",
                url.scheme()
            )));
        }

        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        let extension = Path::new(segment)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                TaskError::Validation(format!("file {source:?} has no extension"))
            })?;
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(TaskError::Validation(format!(
                "unsupported file extension .{extension}; allowed: {}",
                ALLOWED_EXTENSIONS.map(|ext| format!(".{ext}")).join(", ")
            )));
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(TaskError::Validation("file name must not be empty".to_string()));
        }
        if has_separator(name) || name == "." || name == ".." {
            return Err(TaskError::Validation(format!(
                "file name {name:?} must not contain path separators"
            )));
        }

        Ok(Self {
            url,
            name: name.to_string(),
            extension,
        })
    }

    /// Source URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Name the caller chose for the file, without extension.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase extension taken from the URL.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Entry name inside the archive: the chosen name plus the URL's
    /// extension.
    #[must_use]
    pub fn entry_name(&self) -> String {
        format!("{}.{}", self.name, self.extension)
    }
}

fn has_separator(name: &str) -> bool {
    name.contains(['/', '\\'])
}
