//! Fetch and Validate
//!
//! Downloads a stored archive, unpacks it into a private temporary directory
//! and checks the package inside against its own manifests.
//!
//! The outcome is always one of three verdicts. `Invalid` means the package
//! was read and found wrong; `Unknown` means it could not be judged at all.
//! Nothing here returns an error to the caller.

use std::fs;
use std::path::{Path, PathBuf};

use axum::http::StatusCode;
use flate2::read::GzDecoder;
use serde::Serialize;
use tar::EntryType;

use crate::ledger::{LedgerClient, LedgerError, PublicUrls, Tag};
use crate::package::{Bag, BagInfo, Problem};

// ============================================================================
// Outcome Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Valid,
    Invalid,
    Unknown,
}

/// Why a package could not be judged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UnknownReason {
    /// The ledger could not be reached or answered with an error
    Unreachable(String),
    /// No transaction, or no data, for the id
    NotFound,
    /// The bytes are not a gzip tarball
    NotAnArchive(String),
    /// The archive holds no entries
    EmptyArchive,
    /// The archive holds more than one top-level entry
    MultiplePackages(usize),
    /// The top-level entry cannot be read as a package
    NotAPackage(String),
    /// The download or its unpacked contents exceed the fetch limit
    TooLarge(u64),
    /// Local disk failure while staging the download
    Storage(String),
}

impl UnknownReason {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unreachable(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound | Self::EmptyArchive => StatusCode::NOT_FOUND,
            Self::NotAnArchive(_)
            | Self::MultiplePackages(_)
            | Self::NotAPackage(_)
            | Self::TooLarge(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "ledger unreachable: {}", e),
            Self::NotFound => write!(f, "transaction not found"),
            Self::NotAnArchive(e) => write!(f, "not a tar.gz archive: {}", e),
            Self::EmptyArchive => write!(f, "archive is empty"),
            Self::MultiplePackages(n) => write!(f, "expected one package, found {} entries", n),
            Self::NotAPackage(e) => write!(f, "not a package: {}", e),
            Self::TooLarge(limit) => write!(f, "archive exceeds {} bytes", limit),
            Self::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

/// What was read from a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub name: String,
    /// Every `bag-info.txt` entry, in order
    pub bag_info: BagInfo,
    /// Caller-supplied tags only
    pub tags: Vec<Tag>,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid {
        package: PackageSummary,
    },
    Invalid {
        package: PackageSummary,
        problems: Vec<Problem>,
    },
    Unknown {
        reason: UnknownReason,
    },
}

impl ValidationOutcome {
    fn unknown(reason: UnknownReason) -> Self {
        Self::Unknown { reason }
    }

    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Valid { .. } => Verdict::Valid,
            Self::Invalid { .. } => Verdict::Invalid,
            Self::Unknown { .. } => Verdict::Unknown,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Valid { .. } | Self::Invalid { .. } => StatusCode::OK,
            Self::Unknown { reason } => reason.status_code(),
        }
    }
}

/// Response body for a validation request
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub transaction_id: String,
    pub transaction_url: String,
    pub file_url: String,
    pub valid: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bag_info: Option<BagInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<Problem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationReport {
    pub fn new(id: &str, urls: &PublicUrls, outcome: ValidationOutcome) -> Self {
        let mut report = Self {
            transaction_id: id.to_string(),
            transaction_url: urls.transaction_url(id),
            file_url: urls.data_url(id),
            valid: outcome.verdict(),
            package_name: None,
            bag_info: None,
            tags: None,
            problems: Vec::new(),
            reason: None,
        };

        let package = match outcome {
            ValidationOutcome::Valid { package } => package,
            ValidationOutcome::Invalid { package, problems } => {
                report.problems = problems;
                package
            }
            ValidationOutcome::Unknown { reason } => {
                report.reason = Some(reason.to_string());
                return report;
            }
        };

        report.package_name = Some(package.name);
        report.bag_info = Some(package.bag_info);
        report.tags = Some(package.tags);
        report
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Download the data of `id` and validate the package inside.
///
/// `max_bytes` bounds both the download and the total size of the entries
/// unpacked from it.
pub async fn fetch_and_validate(
    client: &dyn LedgerClient,
    id: &str,
    staging_root: Option<&Path>,
    max_bytes: u64,
) -> ValidationOutcome {
    let staging = match staging_dir(staging_root) {
        Ok(dir) => dir,
        Err(e) => return ValidationOutcome::unknown(UnknownReason::Storage(e.to_string())),
    };
    let archive_path = staging.path().join("download.tar.gz");

    let downloaded: Result<u64, LedgerError> = async {
        let mut file = tokio::fs::File::create(&archive_path).await?;
        client.download(id, &mut file, max_bytes).await
    }
    .await;

    match downloaded {
        Ok(bytes) => {
            tracing::debug!(transaction_id = %id, bytes = bytes, "Fetched archive for validation");
        }
        Err(LedgerError::NotFound(_)) => return ValidationOutcome::unknown(UnknownReason::NotFound),
        Err(LedgerError::TooLarge { limit }) => {
            return ValidationOutcome::unknown(UnknownReason::TooLarge(limit))
        }
        Err(LedgerError::Io(e)) => {
            return ValidationOutcome::unknown(UnknownReason::Storage(e.to_string()))
        }
        Err(e) => {
            tracing::warn!(transaction_id = %id, "Fetch failed: {}", e);
            return ValidationOutcome::unknown(UnknownReason::Unreachable(e.to_string()));
        }
    }

    let result = tokio::task::spawn_blocking(move || {
        let outcome = validate_archive_file(&archive_path, max_bytes);
        drop(staging);
        outcome
    })
    .await;

    let outcome = result.unwrap_or_else(|e| {
        ValidationOutcome::unknown(UnknownReason::Storage(format!("validation task failed: {}", e)))
    });

    tracing::info!(
        transaction_id = %id,
        verdict = ?outcome.verdict(),
        "Validated archive"
    );
    outcome
}

/// Unpack a tar.gz file and validate the single package inside. Blocking.
pub fn validate_archive_file(path: &Path, max_unpacked: u64) -> ValidationOutcome {
    let unpack_dir = match staging_dir(path.parent()) {
        Ok(dir) => dir,
        Err(e) => return ValidationOutcome::unknown(UnknownReason::Storage(e.to_string())),
    };

    if let Err(reason) = unpack_archive(path, unpack_dir.path(), max_unpacked) {
        return ValidationOutcome::unknown(reason);
    }

    validate_package_root(unpack_dir.path())
}

/// Unpack regular files and directories only. Links are refused before
/// anything is written for them, and entry paths may not leave `dest`.
fn unpack_archive(path: &Path, dest: &Path, max_unpacked: u64) -> Result<(), UnknownReason> {
    let not_an_archive = |e: std::io::Error| UnknownReason::NotAnArchive(e.to_string());

    let file = fs::File::open(path).map_err(|e| UnknownReason::Storage(e.to_string()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(false);

    let mut unpacked = 0u64;
    for entry in archive.entries().map_err(not_an_archive)? {
        let mut entry = entry.map_err(not_an_archive)?;
        let name = entry.path().map_err(not_an_archive)?.display().to_string();

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Directory => {}
            EntryType::XGlobalHeader => continue,
            EntryType::Symlink | EntryType::Link => {
                return Err(UnknownReason::NotAPackage(format!("{} is a link", name)))
            }
            other => {
                return Err(UnknownReason::NotAPackage(format!(
                    "{} has unsupported entry type {:?}",
                    name, other
                )))
            }
        }

        unpacked = unpacked.saturating_add(entry.size());
        if unpacked > max_unpacked {
            return Err(UnknownReason::TooLarge(max_unpacked));
        }

        if !entry.unpack_in(dest).map_err(not_an_archive)? {
            return Err(UnknownReason::NotAPackage(format!(
                "{} escapes the archive",
                name
            )));
        }
    }

    Ok(())
}

/// Validate the one package directory expected directly under `dir`.
pub fn validate_package_root(dir: &Path) -> ValidationOutcome {
    let entries: std::io::Result<Vec<PathBuf>> = fs::read_dir(dir)
        .and_then(|entries| entries.map(|e| e.map(|e| e.path())).collect());
    let entries = match entries {
        Ok(entries) => entries,
        Err(e) => return ValidationOutcome::unknown(UnknownReason::Storage(e.to_string())),
    };

    let root = match entries.as_slice() {
        [] => return ValidationOutcome::unknown(UnknownReason::EmptyArchive),
        [root] if is_real_dir(root) => root,
        [other] => {
            return ValidationOutcome::unknown(UnknownReason::NotAPackage(format!(
                "{} is not a directory",
                other.display()
            )))
        }
        many => return ValidationOutcome::unknown(UnknownReason::MultiplePackages(many.len())),
    };

    let bag = match Bag::open(root) {
        Ok(bag) => bag,
        Err(e) => return ValidationOutcome::unknown(UnknownReason::NotAPackage(e.to_string())),
    };
    let problems = match bag.validate() {
        Ok(problems) => problems,
        Err(e) => return ValidationOutcome::unknown(UnknownReason::NotAPackage(e.to_string())),
    };

    let package = PackageSummary {
        name: bag.name(),
        bag_info: bag.info().clone(),
        tags: bag.info().caller_tags(),
        file_count: bag.manifest().len(),
    };

    if problems.is_empty() {
        ValidationOutcome::Valid { package }
    } else {
        ValidationOutcome::Invalid { package, problems }
    }
}

fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.is_dir())
}

/// Private scratch directory for one download.
pub(crate) fn staging_dir(root: Option<&Path>) -> std::io::Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("permastore-fetch-");
    match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
}
