//! Archive Builder
//!
//! Turns a set of files and tags into one `<package>_v0.tar.gz` inside a
//! staging directory private to the call. The staging directory is removed
//! when the `Archive` is dropped unless it is persisted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use uuid::Uuid;

use super::bag::{write_bag, BagInfo, BagMetadata, Manifest};
use super::types::{ArchiveRequest, PackagingError};

/// Packaging format version, carried in every archive file name
pub const FORMAT_VERSION: &str = "v0";

const STAGING_PREFIX: &str = "permastore-";

/// Builds archives from caller files
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    /// Parent of per-call staging directories (system temp dir when `None`)
    staging_root: Option<PathBuf>,
    agent: String,
    bagging_date: bool,
}

impl ArchiveBuilder {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            staging_root: None,
            agent: agent.into(),
            bagging_date: true,
        }
    }

    pub fn with_staging_root(mut self, root: Option<PathBuf>) -> Self {
        self.staging_root = root;
        self
    }

    /// Whether `bag-info.txt` records the date the package was made
    pub fn with_bagging_date(mut self, enabled: bool) -> Self {
        self.bagging_date = enabled;
        self
    }

    /// Build the archive. Blocking; run it off the async executor.
    pub fn build(&self, request: &ArchiveRequest) -> Result<Archive, PackagingError> {
        request.validate()?;

        let staging = match &self.staging_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir()?,
        };

        let package_name = request
            .package_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let package_root = staging.path().join(&package_name);
        fs::create_dir(&package_root)?;

        let bag = write_bag(
            &package_root,
            &request.files,
            &BagMetadata {
                tags: &request.tags,
                agent: &self.agent,
                bagging_date: self.bagging_date.then(|| Utc::now().date_naive()),
            },
        )?;

        let path = staging
            .path()
            .join(format!("{}_{}.tar.gz", package_name, FORMAT_VERSION));
        write_archive(&path, &package_root, &package_name)?;
        let size = fs::metadata(&path)?.len();

        tracing::info!(
            package = %package_name,
            files = request.files.len(),
            size = size,
            path = %path.display(),
            "Built archive"
        );

        Ok(Archive {
            package_name,
            path,
            size,
            manifest: bag.manifest().clone(),
            info: bag.info().clone(),
            staging: Some(staging),
        })
    }
}

/// A built archive and the staging directory that holds it
#[derive(Debug)]
pub struct Archive {
    pub package_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub manifest: Manifest,
    pub info: BagInfo,
    staging: Option<TempDir>,
}

impl Archive {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Keep the staging directory on disk, returning the archive path.
    pub fn persist(mut self) -> PathBuf {
        if let Some(staging) = self.staging.take() {
            let kept = staging.keep();
            tracing::info!(path = %kept.display(), "Retaining staged archive");
        }
        self.path
    }
}

/// Write `package_root` as `<package_name>/...` into a gzip tarball.
///
/// Entries are appended in sorted order with normalized headers, so the
/// bytes depend only on the package contents.
fn write_archive(path: &Path, package_root: &Path, package_name: &str) -> io::Result<()> {
    let file = fs::File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);
    tar.follow_symlinks(false);

    tar.append_dir(package_name, package_root)?;
    for relative in sorted_entries(package_root)? {
        let source = package_root.join(&relative);
        let name = Path::new(package_name).join(&relative);
        if source.is_dir() {
            tar.append_dir(&name, &source)?;
        } else {
            tar.append_path_with_name(&source, &name)?;
        }
    }

    let encoder = tar.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()
}

/// All paths under `root`, relative to it, depth-first in name order.
fn sorted_entries(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(root, Path::new(""), &mut out)?;
    Ok(out)
}

fn walk(dir: &Path, prefix: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let relative = prefix.join(entry.file_name());
        let is_dir = entry.file_type()?.is_dir();
        out.push(relative.clone());
        if is_dir {
            walk(&entry.path(), &relative, out)?;
        }
    }
    Ok(())
}
