//! Packaging Module
//!
//! Builds the archives that are stored on the ledger:
//! - `types`: caller files, archive requests and their validation
//! - `bag`: the BagIt package format (writing, reading, validating)
//! - `builder`: staging, bagging and tar.gz serialization
//!
//! Build Flow:
//! 1. The request is validated (names, duplicates, tags) before touching disk
//! 2. A fresh staging directory is created for the call
//! 3. Files are written under `<package>/data/` and the tag files generated
//! 4. The package directory is written to `<package>_v0.tar.gz`

pub mod bag;
pub mod builder;
pub mod types;

pub use bag::{Bag, BagError, BagInfo, Manifest, Problem, BAGIT_VERSION};
pub use builder::{Archive, ArchiveBuilder, FORMAT_VERSION};
pub use types::*;
