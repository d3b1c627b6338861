//! Append-then-finalize zip archive owned by a single task.
//!
//! An [`ArchiveSink`] wraps the archive file handle and its zip writer. Entries
//! are appended one at a time; [`ArchiveSink::finalize`] writes the central
//! directory, syncs the file, and closes it. After finalization every further
//! operation fails with [`SinkError::Finalized`] instead of touching the file.
//!
//! The sink is not internally synchronized. The task registry keeps each sink
//! behind its own mutex so that entries of one archive are written serially.
//!
//! Archives normally land in a file created by [`ArchiveSink::open`]. Any
//! seekable [`ArchiveTarget`] can back a sink through
//! [`ArchiveSink::with_target`].

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Errors raised by [`ArchiveSink`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The archive file could not be created.
    #[error("cannot create archive at {}: {source}", path.display())]
    Location {
        /// Requested archive path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Appending an entry failed. Earlier entries are unaffected.
    #[error("failed to write entry {entry}: {message}")]
    Write {
        /// Entry name inside the archive.
        entry: String,
        /// Codec or I/O failure description.
        message: String,
    },

    /// Writing the central directory or syncing the file failed.
    #[error("failed to finalize archive {}: {message}", path.display())]
    Finalize {
        /// Archive path.
        path: PathBuf,
        /// Codec or I/O failure description.
        message: String,
    },

    /// The archive was already finalized.
    #[error("archive {} is already finalized", path.display())]
    Finalized {
        /// Archive path.
        path: PathBuf,
    },
}

/// Seekable byte sink an archive is written into.
pub trait ArchiveTarget: Write + Seek + Send {
    /// Make everything written so far durable.
    fn sync(&mut self) -> io::Result<()>;
}

impl ArchiveTarget for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Incremental zip archive with a single, explicit finalization.
pub struct ArchiveSink {
    path: PathBuf,
    writer: Option<ZipWriter<Box<dyn ArchiveTarget>>>,
    entries: usize,
}

impl ArchiveSink {
    /// Create a new archive file at `path`.
    ///
    /// The file must not already exist: two tasks never share an archive.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Location`] if the file exists or cannot be
    /// created (missing directory, permissions).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| SinkError::Location {
                path: path.clone(),
                source,
            })?;

        Ok(Self::with_target(path, file))
    }

    /// Write the archive into `target`, reporting it as `path`.
    #[must_use]
    pub fn with_target(path: impl Into<PathBuf>, target: impl ArchiveTarget + 'static) -> Self {
        let target: Box<dyn ArchiveTarget> = Box::new(target);
        Self {
            path: path.into(),
            writer: Some(ZipWriter::new(target)),
            entries: 0,
        }
    }

    /// Path of the archive file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far.
    #[must_use]
    pub const fn entries(&self) -> usize {
        self.entries
    }

    /// Returns `true` once [`finalize`](Self::finalize) has run.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.writer.is_none()
    }

    /// Append `contents` as a new entry called `entry`.
    ///
    /// On failure the partially written entry is discarded so the archive
    /// still finalizes to the entries that succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Finalized`] after finalization and
    /// [`SinkError::Write`] on codec or I/O failure.
    pub fn add_entry(&mut self, entry: &str, contents: &[u8]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or_else(|| SinkError::Finalized {
            path: self.path.clone(),
        })?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(contents.len() as u64 >= u64::from(u32::MAX));

        if let Err(e) = writer.start_file(entry, options) {
            return Err(SinkError::Write {
                entry: entry.to_string(),
                message: e.to_string(),
            });
        }
        if let Err(e) = writer.write_all(contents) {
            // Drop the half-written entry; the previous ones stay intact.
            let message = match writer.abort_file() {
                Ok(()) => e.to_string(),
                Err(abort) => {
                    warn!(
                        archive = %self.path.display(),
                        entry = %entry,
                        error = %abort,
                        "failed to discard partial archive entry"
                    );
                    format!("{e}; discarding the partial entry also failed: {abort}")
                },
            };
            return Err(SinkError::Write {
                entry: entry.to_string(),
                message,
            });
        }

        self.entries += 1;
        Ok(())
    }

    /// Write the central directory, flush, and close the archive.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Finalized`] if called twice and
    /// [`SinkError::Finalize`] if the archive cannot be completed. The sink is
    /// considered finalized in both cases.
    pub fn finalize(&mut self) -> Result<(), SinkError> {
        let writer = self.writer.take().ok_or_else(|| SinkError::Finalized {
            path: self.path.clone(),
        })?;

        let mut target = writer.finish().map_err(|e| SinkError::Finalize {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        target.sync().map_err(|e| SinkError::Finalize {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for ArchiveSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSink")
            .field("path", &self.path)
            .field("entries", &self.entries)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::testing::{FaultyTarget, incompressible};
    use super::*;

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let file = File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn test_open_add_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");

        let mut sink = ArchiveSink::open(&path).unwrap();
        sink.add_entry("a.png", b"first").unwrap();
        sink.add_entry("b.pdf", b"second").unwrap();
        assert_eq!(sink.entries(), 2);
        assert!(!sink.is_finalized());

        sink.finalize().unwrap();
        assert!(sink.is_finalized());

        let entries = read_entries(&path);
        assert_eq!(
            entries,
            vec![
                ("a.png".to_string(), b"first".to_vec()),
                ("b.pdf".to_string(), b"second".to_vec()),
            ]
        );
    }

    #[test]
    fn test_open_missing_directory_is_location_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("bundle.zip");

        let err = ArchiveSink::open(&path).unwrap_err();
        assert!(matches!(err, SinkError::Location { .. }));
    }

    #[test]
    fn test_open_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        std::fs::write(&path, b"keep me").unwrap();

        let err = ArchiveSink::open(&path).unwrap_err();
        assert!(matches!(err, SinkError::Location { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_add_after_finalize_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");

        let mut sink = ArchiveSink::open(&path).unwrap();
        sink.add_entry("a.jpg", b"x").unwrap();
        sink.finalize().unwrap();

        let err = sink.add_entry("b.jpg", b"y").unwrap_err();
        assert!(matches!(err, SinkError::Finalized { .. }));
        assert_eq!(read_entries(&path).len(), 1);
    }

    #[test]
    fn test_second_finalize_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ArchiveSink::open(dir.path().join("bundle.zip")).unwrap();
        sink.finalize().unwrap();

        assert!(matches!(
            sink.finalize().unwrap_err(),
            SinkError::Finalized { .. }
        ));
    }

    #[test]
    fn test_failed_entry_leaves_earlier_entries_intact() {
        let target = FaultyTarget::failing_bulk_write();
        let mut sink = ArchiveSink::with_target("memory.zip", target.clone());
        let bulk = incompressible(256 * 1024);

        sink.add_entry("a.png", b"small").unwrap();
        let err = sink.add_entry("b.png", &bulk).unwrap_err();
        assert!(matches!(err, SinkError::Write { ref entry, .. } if entry == "b.png"));
        assert_eq!(sink.entries(), 1);

        sink.add_entry("c.png", &bulk).unwrap();
        sink.finalize().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(target.bytes())).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.png", "c.png"]);

        let mut data = Vec::new();
        archive.by_name("c.png").unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, bulk);
    }

    #[test]
    fn test_sync_failure_is_finalize_error() {
        let mut sink = ArchiveSink::with_target("memory.zip", FaultyTarget::failing_sync());
        sink.add_entry("a.pdf", b"pdf").unwrap();

        let err = sink.finalize().unwrap_err();
        assert!(matches!(err, SinkError::Finalize { .. }));
        assert!(sink.is_finalized());
        assert!(matches!(
            sink.add_entry("b.pdf", b"pdf").unwrap_err(),
            SinkError::Finalized { .. }
        ));
    }
}
