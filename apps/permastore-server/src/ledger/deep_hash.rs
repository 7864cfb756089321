//! Deep hash
//!
//! SHA-384 hash over a nested list of byte strings. Each blob and list is
//! prefixed with its kind and length, so differently nested inputs with the
//! same bytes never collide. Transaction signatures are computed over the
//! deep hash of the header fields.

use sha2::{Digest, Sha384};

/// Digest size of SHA-384
pub const DEEP_HASH_SIZE: usize = 48;

/// Input to the deep hash: a blob or a list of items
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepHashItem {
    Blob(Vec<u8>),
    List(Vec<DeepHashItem>),
}

impl DeepHashItem {
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Blob(bytes.into())
    }
}

/// Compute the deep hash of an item.
pub fn deep_hash(item: &DeepHashItem) -> [u8; DEEP_HASH_SIZE] {
    match item {
        DeepHashItem::Blob(data) => {
            let tag = Sha384::digest(format!("blob{}", data.len()).as_bytes());
            let data_hash = Sha384::digest(data);
            let mut hasher = Sha384::new();
            hasher.update(tag);
            hasher.update(data_hash);
            to_array(&hasher.finalize())
        }
        DeepHashItem::List(items) => {
            let mut acc = to_array(&Sha384::digest(format!("list{}", items.len()).as_bytes()));
            for child in items {
                let mut hasher = Sha384::new();
                hasher.update(acc);
                hasher.update(deep_hash(child));
                acc = to_array(&hasher.finalize());
            }
            acc
        }
    }
}

fn to_array(digest: &[u8]) -> [u8; DEEP_HASH_SIZE] {
    let mut out = [0u8; DEEP_HASH_SIZE];
    out.copy_from_slice(digest);
    out
}
