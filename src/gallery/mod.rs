//! Gallery entries handed over by the enumeration collaborator and the
//! selection model that turns taps into an ordered import list.

mod selection;

use std::fmt;
use std::path::{Path, PathBuf};

pub use selection::{GallerySelection, SelectionChange, SelectionError, SelectionPolicy};

/// Opaque reference to a source image's backing storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef(PathBuf);

impl SourceRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for SourceRef {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&Path> for SourceRef {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

/// One gallery row: stable id, backing reference, `date_added` in unix
/// seconds and a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryImage {
    pub id: u64,
    pub reference: SourceRef,
    pub date_added: u64,
    pub display_name: String,
}

impl GalleryImage {
    pub fn new(
        id: u64,
        reference: impl Into<SourceRef>,
        date_added: u64,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            reference: reference.into(),
            date_added,
            display_name: display_name.into(),
        }
    }
}
