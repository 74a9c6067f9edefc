use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::gallery::SourceRef;

const PICTURES_SUBDIR: &str = "Pictures";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("missing HOME environment variable")]
    MissingHomeDirectory,
    #[error("output name is empty")]
    MissingName,
    #[error("output entry already exists: {path}")]
    AlreadyExists { path: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Persistent reference to an entry written into a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkHandle {
    pub location: PathBuf,
    pub display_name: String,
    pub mime: String,
}

/// Gallery-like store for exported images.
///
/// Writing is two-phase: `create_pending` provisions an empty entry, `write`
/// fills it. A pending entry that is never written must be `discard`ed.
pub trait OutputSink: Send + Sync {
    fn create_pending(
        &self,
        display_name: &str,
        mime: &str,
        relative_path: &str,
    ) -> SinkResult<SinkHandle>;
    fn write(&self, entry: &SinkHandle, bytes: &[u8]) -> SinkResult<()>;
    fn discard(&self, entry: &SinkHandle) -> SinkResult<()>;
}

/// Sink that stores entries as files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub const fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn with_default_paths() -> SinkResult<Self> {
        let home = std::env::var_os("HOME").ok_or(SinkError::MissingHomeDirectory)?;
        let mut root = PathBuf::from(home);
        root.push(PICTURES_SUBDIR);
        Ok(Self::with_root(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_path(&self, display_name: &str, relative_path: &str) -> SinkResult<PathBuf> {
        if display_name.is_empty() {
            return Err(SinkError::MissingName);
        }
        let mut path = self.root.clone();
        if !relative_path.is_empty() {
            path.push(relative_path);
        }
        path.push(display_name);
        Ok(path)
    }
}

impl OutputSink for DirectorySink {
    fn create_pending(
        &self,
        display_name: &str,
        mime: &str,
        relative_path: &str,
    ) -> SinkResult<SinkHandle> {
        let path = self.target_path(display_name, relative_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SinkError::AlreadyExists { path });
            }
            Err(source) => return Err(SinkError::Io { path, source }),
        }

        tracing::debug!(path = %path.display(), mime, "created pending output entry");
        Ok(SinkHandle {
            location: path,
            display_name: display_name.to_string(),
            mime: mime.to_string(),
        })
    }

    fn write(&self, entry: &SinkHandle, bytes: &[u8]) -> SinkResult<()> {
        let path = &entry.location;
        let io_error = |source| SinkError::Io {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(io_error)?;
        file.write_all(bytes).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        Ok(())
    }

    fn discard(&self, entry: &SinkHandle) -> SinkResult<()> {
        match fs::remove_file(&entry.location) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SinkError::Io {
                path: entry.location.clone(),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionStatus {
    Deleted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionResult {
    pub reference: SourceRef,
    pub status: DeletionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub results: Vec<DeletionResult>,
}

impl DeletionReport {
    pub fn deleted_count(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.status == DeletionStatus::Deleted)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.deleted_count()
    }

    pub fn is_partial(&self) -> bool {
        self.deleted_count() > 0 && self.failed_count() > 0
    }
}

/// Result of a deletion request. `Deferred` means an external confirmation
/// flow owns the outcome and it may never be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Completed(DeletionReport),
    Deferred,
}

pub trait SourceDeleter: Send + Sync {
    fn request_deletion(&self, sources: &[SourceRef]) -> DeletionOutcome;
}

/// Deletes file-backed sources directly, one result per reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSourceDeleter;

impl SourceDeleter for FileSourceDeleter {
    fn request_deletion(&self, sources: &[SourceRef]) -> DeletionOutcome {
        let results = sources
            .iter()
            .map(|reference| {
                let status = match fs::remove_file(reference.path()) {
                    Ok(()) => DeletionStatus::Deleted,
                    Err(err) => {
                        tracing::warn!(reference = %reference, ?err, "failed to delete source image");
                        DeletionStatus::Failed(err.to_string())
                    }
                };
                DeletionResult {
                    reference: reference.clone(),
                    status,
                }
            })
            .collect();
        DeletionOutcome::Completed(DeletionReport { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "stitcher-storage-{label}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn target_path_joins_root_relative_path_and_name() {
        let sink = DirectorySink::with_root(PathBuf::from("/home/test/Pictures"));
        let path = sink.target_path("stitched_1.png", "ImageStitcher").unwrap();
        assert_eq!(path, PathBuf::from("/home/test/Pictures/ImageStitcher/stitched_1.png"));
        assert!(matches!(
            sink.target_path("", "ImageStitcher"),
            Err(SinkError::MissingName)
        ));
    }

    #[test]
    fn pending_entry_lifecycle_write_and_discard() {
        let root = scratch_dir("lifecycle");
        let sink = DirectorySink::with_root(root.clone());

        let entry = sink
            .create_pending("out.png", "image/png", "ImageStitcher")
            .unwrap();
        assert!(entry.location.exists());
        assert_eq!(fs::read(&entry.location).unwrap().len(), 0);

        sink.write(&entry, b"png").unwrap();
        assert_eq!(fs::read(&entry.location).unwrap(), b"png");

        sink.discard(&entry).unwrap();
        assert!(!entry.location.exists());
        sink.discard(&entry).expect("discarding twice is not an error");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn create_pending_refuses_to_overwrite() {
        let root = scratch_dir("collision");
        let sink = DirectorySink::with_root(root.clone());
        sink.create_pending("same.png", "image/png", "").unwrap();
        let err = sink.create_pending("same.png", "image/png", "").unwrap_err();
        assert!(matches!(err, SinkError::AlreadyExists { .. }));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn file_deleter_reports_partial_success() {
        let root = scratch_dir("deleter");
        fs::create_dir_all(&root).unwrap();
        let present = root.join("a.png");
        fs::write(&present, b"x").unwrap();
        let missing = root.join("gone.png");

        let outcome = FileSourceDeleter
            .request_deletion(&[SourceRef::new(&present), SourceRef::new(&missing)]);
        let DeletionOutcome::Completed(report) = outcome else {
            panic!("file deletion should complete synchronously");
        };
        assert_eq!(report.deleted_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(report.is_partial());
        assert!(!present.exists());
        let _ = fs::remove_dir_all(root);
    }
}
