//! BagIt packages
//!
//! A bag is a directory holding the payload under `data/` plus plain-text tag
//! files: `bagit.txt` (declaration), `bag-info.txt` (metadata), and SHA-256
//! manifests over the payload and over the tag files themselves.
//!
//! Everything written here is derived from the payload and the supplied
//! metadata alone, with entries sorted, so the same inputs always produce
//! the same tag files.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::PackageFile;
use crate::ledger::Tag;

pub const BAGIT_VERSION: &str = "0.97";
pub const PAYLOAD_DIR: &str = "data";

const BAGIT_TXT: &str = "bagit.txt";
const BAG_INFO_TXT: &str = "bag-info.txt";
const MANIFEST_TXT: &str = "manifest-sha256.txt";
const TAG_MANIFEST_TXT: &str = "tagmanifest-sha256.txt";

pub const PACKAGING_AGENT_LABEL: &str = "Packaging-Agent";
pub const PAYLOAD_OXUM_LABEL: &str = "Payload-Oxum";
pub const BAGGING_DATE_LABEL: &str = "Bagging-Date";

/// Labels the packager writes itself
pub const RESERVED_LABELS: [&str; 3] = [
    PACKAGING_AGENT_LABEL,
    PAYLOAD_OXUM_LABEL,
    BAGGING_DATE_LABEL,
];

// ============================================================================
// Errors and Problems
// ============================================================================

/// The directory cannot be read as a bag at all
#[derive(Debug, thiserror::Error)]
pub enum BagError {
    #[error("Not a bag: missing {0}")]
    MissingTagFile(&'static str),

    #[error("Malformed {file} line {line}: {reason}")]
    Malformed {
        file: &'static str,
        line: usize,
        reason: String,
    },

    #[error("Path escapes the bag: {0}")]
    UnsafePath(String),

    #[error("Failed to read bag: {0}")]
    Io(#[from] io::Error),
}

/// A way in which a readable bag fails validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    /// Listed in the manifest but absent from the payload
    MissingFile { path: String },
    /// Present in the payload but not listed
    UnexpectedFile { path: String },
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    TagFileChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    OxumMismatch { expected: String, actual: String },
}

// ============================================================================
// bag-info.txt
// ============================================================================

/// Ordered `Label: value` metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BagInfo {
    entries: Vec<Tag>,
}

impl BagInfo {
    pub fn new(entries: Vec<Tag>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Tag] {
        &self.entries
    }

    /// First value for a label (labels compare case-insensitively)
    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|tag| tag.name.eq_ignore_ascii_case(label))
            .map(|tag| tag.value.as_str())
    }

    /// Entries other than those the packager writes itself
    pub fn caller_tags(&self) -> Vec<Tag> {
        self.entries
            .iter()
            .filter(|tag| {
                !RESERVED_LABELS
                    .iter()
                    .any(|reserved| reserved.eq_ignore_ascii_case(&tag.name))
            })
            .cloned()
            .collect()
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|tag| format!("{}: {}\n", tag.name, tag.value))
            .collect()
    }

    /// Parse `Label: value` lines; indented lines continue the previous value.
    pub fn parse(text: &str) -> Result<Self, BagError> {
        let mut entries: Vec<Tag> = Vec::new();

        for (index, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }

            if line.starts_with([' ', '\t']) {
                let Some(last) = entries.last_mut() else {
                    return Err(BagError::Malformed {
                        file: BAG_INFO_TXT,
                        line: index + 1,
                        reason: "continuation without a label".to_string(),
                    });
                };
                last.value.push(' ');
                last.value.push_str(line.trim_start());
                continue;
            }

            let (name, value) = line.split_once(':').ok_or_else(|| BagError::Malformed {
                file: BAG_INFO_TXT,
                line: index + 1,
                reason: "expected 'Label: value'".to_string(),
            })?;
            let value = value.strip_prefix(' ').unwrap_or(value);
            entries.push(Tag::new(name.trim_end(), value));
        }

        Ok(Self { entries })
    }
}

// ============================================================================
// Manifests
// ============================================================================

/// Relative path -> hex SHA-256, kept sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(path.into(), digest.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(path, digest)| format!("{}  {}\n", digest, path))
            .collect()
    }

    fn parse(text: &str, file: &'static str) -> Result<Self, BagError> {
        let mut manifest = Self::default();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let malformed = |reason: &str| BagError::Malformed {
                file,
                line: index + 1,
                reason: reason.to_string(),
            };

            let (digest, path) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("expected '<digest> <path>'"))?;
            let path = path.trim_start().trim_start_matches('*');
            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed("not a SHA-256 digest"));
            }
            check_relative(path)?;
            manifest.insert(path, digest.to_ascii_lowercase());
        }
        Ok(manifest)
    }
}

/// Reject absolute paths and `..` components.
fn check_relative(path: &str) -> Result<(), BagError> {
    let safe = !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(BagError::UnsafePath(path.to_string()))
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Metadata written alongside the payload
#[derive(Debug, Clone)]
pub struct BagMetadata<'a> {
    /// Caller tags, in order
    pub tags: &'a [Tag],
    pub agent: &'a str,
    pub bagging_date: Option<NaiveDate>,
}

/// Write `files` into `root/data/` and generate every tag file.
pub fn write_bag(root: &Path, files: &[PackageFile], metadata: &BagMetadata) -> io::Result<Bag> {
    let payload_dir = root.join(PAYLOAD_DIR);
    fs::create_dir_all(&payload_dir)?;

    let mut manifest = Manifest::default();
    let mut payload_bytes = 0u64;
    for file in files {
        fs::write(payload_dir.join(&file.name), &file.content)?;
        manifest.insert(
            format!("{}/{}", PAYLOAD_DIR, file.name),
            hex::encode(Sha256::digest(&file.content)),
        );
        payload_bytes += file.content.len() as u64;
    }

    let mut entries = metadata.tags.to_vec();
    entries.push(Tag::new(PACKAGING_AGENT_LABEL, metadata.agent));
    entries.push(Tag::new(
        PAYLOAD_OXUM_LABEL,
        format!("{}.{}", payload_bytes, files.len()),
    ));
    if let Some(date) = metadata.bagging_date {
        entries.push(Tag::new(BAGGING_DATE_LABEL, date.format("%Y-%m-%d").to_string()));
    }
    let info = BagInfo::new(entries);

    let declaration = format!(
        "BagIt-Version: {}\nTag-File-Character-Encoding: UTF-8\n",
        BAGIT_VERSION
    );

    let mut tag_manifest = Manifest::default();
    for (name, contents) in [
        (BAGIT_TXT, declaration),
        (BAG_INFO_TXT, info.render()),
        (MANIFEST_TXT, manifest.render()),
    ] {
        fs::write(root.join(name), &contents)?;
        tag_manifest.insert(name, hex::encode(Sha256::digest(contents.as_bytes())));
    }
    fs::write(root.join(TAG_MANIFEST_TXT), tag_manifest.render())?;

    Ok(Bag {
        root: root.to_path_buf(),
        info,
        manifest,
        tag_manifest: Some(tag_manifest),
    })
}

// ============================================================================
// Reading and Validation
// ============================================================================

/// A bag on disk
#[derive(Debug, Clone)]
pub struct Bag {
    root: PathBuf,
    info: BagInfo,
    manifest: Manifest,
    tag_manifest: Option<Manifest>,
}

impl Bag {
    /// Open a bag, reading its declaration, metadata and manifests.
    pub fn open(root: &Path) -> Result<Self, BagError> {
        let declaration = read_tag_file(root, BAGIT_TXT)?
            .ok_or(BagError::MissingTagFile(BAGIT_TXT))?;
        let declaration = BagInfo::parse(&declaration).map_err(|_| BagError::Malformed {
            file: BAGIT_TXT,
            line: 1,
            reason: "unreadable declaration".to_string(),
        })?;
        if declaration.get("BagIt-Version").is_none() {
            return Err(BagError::Malformed {
                file: BAGIT_TXT,
                line: 1,
                reason: "missing BagIt-Version".to_string(),
            });
        }

        let info = match read_tag_file(root, BAG_INFO_TXT)? {
            Some(text) => BagInfo::parse(&text)?,
            None => BagInfo::default(),
        };

        let manifest = read_tag_file(root, MANIFEST_TXT)?
            .ok_or(BagError::MissingTagFile(MANIFEST_TXT))
            .and_then(|text| Manifest::parse(&text, MANIFEST_TXT))?;
        if let Some((path, _)) = manifest
            .iter()
            .find(|(path, _)| !path.starts_with(&format!("{}/", PAYLOAD_DIR)))
        {
            return Err(BagError::UnsafePath(path.to_string()));
        }

        let tag_manifest = read_tag_file(root, TAG_MANIFEST_TXT)?
            .map(|text| Manifest::parse(&text, TAG_MANIFEST_TXT))
            .transpose()?;

        Ok(Self {
            root: root.to_path_buf(),
            info,
            manifest,
            tag_manifest,
        })
    }

    /// Directory name of the bag
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn info(&self) -> &BagInfo {
        &self.info
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Check the payload and tag files against the manifests.
    ///
    /// An empty list means the bag is valid.
    pub fn validate(&self) -> Result<Vec<Problem>, BagError> {
        let mut problems = Vec::new();

        let on_disk = payload_files(&self.root)?;
        for path in on_disk.keys() {
            if self.manifest.get(path).is_none() {
                problems.push(Problem::UnexpectedFile { path: path.clone() });
            }
        }

        for (path, expected) in self.manifest.iter() {
            if !on_disk.contains_key(path) {
                problems.push(Problem::MissingFile {
                    path: path.to_string(),
                });
                continue;
            }
            let actual = hash_file(&self.root.join(path))?;
            if actual != expected {
                problems.push(Problem::ChecksumMismatch {
                    path: path.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        if let Some(tag_manifest) = &self.tag_manifest {
            for (path, expected) in tag_manifest.iter() {
                let full = self.root.join(path);
                if !regular_file(&full, path)? {
                    problems.push(Problem::MissingFile {
                        path: path.to_string(),
                    });
                    continue;
                }
                let actual = hash_file(&full)?;
                if actual != expected {
                    problems.push(Problem::TagFileChecksumMismatch {
                        path: path.to_string(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
        }

        if let Some(expected) = self.info.get(PAYLOAD_OXUM_LABEL) {
            let payload_bytes: u64 = on_disk.values().sum();
            let actual = format!("{}.{}", payload_bytes, on_disk.len());
            if expected != actual {
                problems.push(Problem::OxumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(problems)
    }
}

fn read_tag_file(root: &Path, name: &str) -> Result<Option<String>, BagError> {
    let path = root.join(name);
    if !regular_file(&path, name)? {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Whether `path` is a regular file, without following links. A link is an
/// `UnsafePath` since it may point outside the bag.
fn regular_file(path: &Path, relative: &str) -> Result<bool, BagError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            Err(BagError::UnsafePath(relative.to_string()))
        }
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Every regular file under `data/`, keyed by bag-relative path, with sizes.
fn payload_files(root: &Path) -> Result<BTreeMap<String, u64>, BagError> {
    let mut files = BTreeMap::new();
    let payload = root.join(PAYLOAD_DIR);
    match fs::symlink_metadata(&payload) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(BagError::UnsafePath(PAYLOAD_DIR.to_string()))
        }
        Ok(meta) if meta.is_dir() => collect_files(&payload, PAYLOAD_DIR, &mut files)?,
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(files)
}

fn collect_files(
    dir: &Path,
    prefix: &str,
    out: &mut BTreeMap<String, u64>,
) -> Result<(), BagError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = format!("{}/{}", prefix, name);
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            return Err(BagError::UnsafePath(relative));
        } else if file_type.is_dir() {
            collect_files(&entry.path(), &relative, out)?;
        } else {
            out.insert(relative, entry.metadata()?.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &Path) -> Bag {
        let files = vec![
            PackageFile::new("b.txt", b"second".to_vec()),
            PackageFile::new("a.txt", b"first".to_vec()),
        ];
        let tags = vec![Tag::new("Source-Organization", "Library"), Tag::new("x", "")];
        write_bag(
            dir,
            &files,
            &BagMetadata {
                tags: &tags,
                agent: "permastore",
                bagging_date: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_written_bag_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        sample(&root);

        let bag = Bag::open(&root).unwrap();
        assert_eq!(bag.name(), "pkg");
        assert!(bag.validate().unwrap().is_empty());
        assert_eq!(bag.info().get("payload-oxum"), Some("11.2"));
        assert_eq!(
            bag.info().caller_tags(),
            vec![Tag::new("Source-Organization", "Library"), Tag::new("x", "")]
        );
    }

    #[test]
    fn test_manifest_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path());
        let text = fs::read_to_string(dir.path().join(MANIFEST_TXT)).unwrap();
        let paths: Vec<&str> = text.lines().map(|l| l.split("  ").nth(1).unwrap()).collect();
        assert_eq!(paths, vec!["data/a.txt", "data/b.txt"]);
    }

    #[test]
    fn test_detects_payload_changes() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path());
        fs::write(dir.path().join("data/a.txt"), b"tampered").unwrap();
        fs::remove_file(dir.path().join("data/b.txt")).unwrap();
        fs::write(dir.path().join("data/extra.bin"), b"").unwrap();

        let problems = Bag::open(dir.path()).unwrap().validate().unwrap();

        assert!(problems.contains(&Problem::UnexpectedFile {
            path: "data/extra.bin".to_string()
        }));
        assert!(problems.contains(&Problem::MissingFile {
            path: "data/b.txt".to_string()
        }));
        assert!(problems
            .iter()
            .any(|p| matches!(p, Problem::ChecksumMismatch { path, .. } if path == "data/a.txt")));
        assert!(problems
            .iter()
            .any(|p| matches!(p, Problem::OxumMismatch { .. })));
    }

    #[test]
    fn test_detects_tag_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path());
        let info = dir.path().join(BAG_INFO_TXT);
        let mut text = fs::read_to_string(&info).unwrap();
        text.push_str("Injected: value\n");
        fs::write(&info, text).unwrap();

        let problems = Bag::open(dir.path()).unwrap().validate().unwrap();
        assert!(matches!(
            problems.as_slice(),
            [Problem::TagFileChecksumMismatch { path, .. }] if path == BAG_INFO_TXT
        ));
    }

    #[test]
    fn test_not_a_bag() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme"), b"hello").unwrap();
        assert!(matches!(
            Bag::open(dir.path()),
            Err(BagError::MissingTagFile(BAGIT_TXT))
        ));
    }

    #[test]
    fn test_manifest_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path());
        let digest = "0".repeat(64);
        fs::write(
            dir.path().join(MANIFEST_TXT),
            format!("{}  data/../../etc/passwd\n", digest),
        )
        .unwrap();
        assert!(matches!(Bag::open(dir.path()), Err(BagError::UnsafePath(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_tag_file_is_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret");
        fs::write(&secret, b"Password: hunter2\n").unwrap();

        let dir = tempfile::tempdir().unwrap();
        sample(dir.path());
        fs::remove_file(dir.path().join(BAG_INFO_TXT)).unwrap();
        std::os::unix::fs::symlink(&secret, dir.path().join(BAG_INFO_TXT)).unwrap();

        assert!(matches!(
            Bag::open(dir.path()),
            Err(BagError::UnsafePath(path)) if path == BAG_INFO_TXT
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_payload_dir_is_not_listed() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("host-file"), b"x").unwrap();

        let dir = tempfile::tempdir().unwrap();
        sample(dir.path());
        fs::remove_dir_all(dir.path().join(PAYLOAD_DIR)).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join(PAYLOAD_DIR)).unwrap();

        let bag = Bag::open(dir.path()).unwrap();
        assert!(matches!(bag.validate(), Err(BagError::UnsafePath(path)) if path == PAYLOAD_DIR));
    }

    #[test]
    fn test_bag_info_continuation_lines() {
        let info = BagInfo::parse("External-Description: first part\n  second part\nA:b\n").unwrap();
        assert_eq!(info.get("external-description"), Some("first part second part"));
        assert_eq!(info.get("A"), Some("b"));
        assert!(BagInfo::parse("  orphan\n").is_err());
        assert!(BagInfo::parse("no colon here\n").is_err());
    }

    #[test]
    fn test_bag_info_round_trip_keeps_values() {
        let tags = vec![Tag::new("Note", "  spaced: value  "), Tag::new("Empty", "")];
        let info = BagInfo::new(tags.clone());
        assert_eq!(BagInfo::parse(&info.render()).unwrap().entries(), tags.as_slice());
    }
}
