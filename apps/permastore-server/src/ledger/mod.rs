//! Remote Ledger Module
//!
//! Client side of the permanent ledger store:
//! - `client`: the `LedgerClient` trait the rest of the service talks to
//! - `http`: the reqwest-backed implementation against the store's HTTP API
//! - `merkle` / `deep_hash`: data-root and signature-data hashing
//! - `transaction`: building and signing transaction headers
//! - `uploader`: the chunked upload loop
//!
//! Upload Flow:
//! 1. Price and anchor are queried for the archive size
//! 2. The archive is chunked and its data root computed (streamed from disk)
//! 3. The header is signed and posted
//! 4. Chunks are posted one at a time, each with its merkle proof

pub mod client;
pub mod deep_hash;
pub mod http;
#[cfg(test)]
pub mod memory;
pub mod merkle;
pub mod transaction;
pub mod types;
pub mod uploader;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;

pub use client::{LedgerClient, LedgerError};
pub use http::HttpLedgerClient;
pub use transaction::Transaction;
pub use types::*;
pub use uploader::{
    upload_archive, TransactionUploader, UploadError, UploadState, ARCHIVE_CONTENT_TYPE,
};

/// Unpadded base64url, tolerant of padding on decode
pub const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Length of a transaction id (base64url of a SHA-256 digest)
pub const TRANSACTION_ID_LENGTH: usize = 43;

/// Check that a string has the shape of a transaction id.
pub fn is_valid_transaction_id(id: &str) -> bool {
    id.len() == TRANSACTION_ID_LENGTH
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Public URLs derivable from a transaction id
#[derive(Debug, Clone)]
pub struct PublicUrls {
    explorer_url: String,
    api_url: String,
}

impl PublicUrls {
    pub fn new(explorer_url: &str, api_url: &str) -> Self {
        Self {
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Human-viewable explorer page for a transaction
    pub fn transaction_url(&self, id: &str) -> String {
        format!("{}/tx/{}", self.explorer_url, id)
    }

    /// Raw data URL on the store gateway
    pub fn data_url(&self, id: &str) -> String {
        format!("{}/{}", self.api_url, id)
    }
}
