//! Packaging types

use axum::http::StatusCode;

use crate::ledger::Tag;

use super::bag::RESERVED_LABELS;

// ============================================================================
// Request Types
// ============================================================================

/// One caller-supplied file, taken verbatim into the package payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Base name of the file (no directories)
    pub name: String,
    pub content: Vec<u8>,
}

impl PackageFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Everything needed to build one archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveRequest {
    pub files: Vec<PackageFile>,
    /// Package root directory name; a fresh unique id when absent
    pub package_name: Option<String>,
    /// Manifest tags, in order
    pub tags: Vec<Tag>,
}

impl ArchiveRequest {
    /// Check names and tags before anything touches the disk.
    pub fn validate(&self) -> Result<(), PackagingError> {
        if self.files.is_empty() {
            return Err(PackagingError::NoFiles);
        }

        let mut seen = std::collections::HashSet::new();
        for file in &self.files {
            if !is_safe_name(&file.name) {
                return Err(PackagingError::InvalidFileName(file.name.clone()));
            }
            if !seen.insert(file.name.as_str()) {
                return Err(PackagingError::DuplicateFileName(file.name.clone()));
            }
        }

        if let Some(name) = &self.package_name {
            if !is_safe_name(name) {
                return Err(PackagingError::InvalidPackageName(name.clone()));
            }
        }

        self.tags.iter().try_for_each(validate_tag)
    }
}

/// A single path component that stays inside its parent directory.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0', '\r', '\n'])
}

/// Whether a tag survives a `Label: value` line unchanged.
pub fn fits_manifest(tag: &Tag) -> bool {
    let name = tag.name.as_str();
    name.trim() == name
        && !name.contains(':')
        && !name.contains(['\r', '\n'])
        && !tag.value.contains(['\r', '\n'])
}

fn validate_tag(tag: &Tag) -> Result<(), PackagingError> {
    let name = tag.name.as_str();
    if name.is_empty() || !fits_manifest(tag) {
        return Err(PackagingError::InvalidTag(tag.name.clone()));
    }
    if RESERVED_LABELS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(PackagingError::ReservedTag(tag.name.clone()));
    }
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("No files were supplied")]
    NoFiles,

    #[error("Duplicate file name: {0}")]
    DuplicateFileName(String),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Invalid package name: {0:?}")]
    InvalidPackageName(String),

    #[error("Invalid tag name: {0:?} (tags may not contain ':' in the name or line breaks)")]
    InvalidTag(String),

    #[error("Tag name is reserved for package metadata: {0}")]
    ReservedTag(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl PackagingError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
