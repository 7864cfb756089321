//! Chunked Upload
//!
//! Drives one signed transaction onto the ledger:
//! 1. The header is posted
//! 2. Each call to `upload_chunk` reads the next chunk from disk and posts it
//! 3. The upload is complete once every chunk has been acknowledged
//!
//! A single uploader owns its cursor, so chunks are sent strictly in order,
//! one at a time, never skipped or repeated. Any failure aborts the whole
//! upload; there is no resume.

use std::path::{Path, PathBuf};

use axum::http::StatusCode;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::client::{LedgerClient, LedgerError};
use super::merkle::ChunkLayout;
use super::transaction::Transaction;
use super::types::Tag;
use crate::identity::{Identity, IdentityError};

/// Content type of every archive transaction
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read archive: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Invalid transaction header: {0}")]
    InvalidHeader(String),

    #[error(transparent)]
    Signing(#[from] IdentityError),

    #[error("Upload already complete")]
    AlreadyComplete,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ledger(e) => e.status_code(),
            Self::InvalidHeader(_) => StatusCode::BAD_GATEWAY,
            Self::AlreadyComplete => StatusCode::CONFLICT,
            Self::Io(_) | Self::Signing(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// Upload State
// ============================================================================

/// Progress of one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadState {
    pub transaction_id: String,
    pub header_posted: bool,
    pub chunks_uploaded: usize,
    pub total_chunks: usize,
    /// Bytes acknowledged by the ledger so far
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
}

impl UploadState {
    pub fn is_complete(&self) -> bool {
        self.header_posted && self.chunks_uploaded == self.total_chunks
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.header_posted { 100.0 } else { 0.0 };
        }
        (self.uploaded_bytes as f64 / self.total_bytes as f64) * 100.0
    }
}

// ============================================================================
// Uploader
// ============================================================================

/// Sends one transaction and its chunks, in order
pub struct TransactionUploader {
    transaction: Transaction,
    file: tokio::fs::File,
    buffer: Vec<u8>,
    state: UploadState,
}

impl TransactionUploader {
    /// Open the archive the transaction was built from.
    pub async fn new(transaction: Transaction, path: &Path) -> Result<Self, UploadError> {
        let file = tokio::fs::File::open(path).await?;
        let state = UploadState {
            transaction_id: transaction.id().to_string(),
            header_posted: false,
            chunks_uploaded: 0,
            total_chunks: transaction.chunk_count(),
            uploaded_bytes: 0,
            total_bytes: transaction.layout().data_size,
        };

        Ok(Self {
            transaction,
            file,
            buffer: Vec::new(),
            state,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Post the header on the first call, then one chunk per call.
    pub async fn upload_chunk(&mut self, client: &dyn LedgerClient) -> Result<&UploadState, UploadError> {
        if self.is_complete() {
            return Err(UploadError::AlreadyComplete);
        }

        if !self.state.header_posted {
            client.post_transaction(self.transaction.header()).await?;
            self.state.header_posted = true;
            tracing::debug!(
                transaction_id = %self.state.transaction_id,
                chunks = self.state.total_chunks,
                "Posted transaction header"
            );
            return Ok(&self.state);
        }

        let index = self.state.chunks_uploaded;
        let (start, len) = {
            let chunk = &self.transaction.layout().chunks[index];
            (chunk.min_byte_range, chunk.len() as usize)
        };

        self.buffer.resize(len, 0);
        self.file.seek(std::io::SeekFrom::Start(start)).await?;
        self.file.read_exact(&mut self.buffer).await?;

        let payload = self
            .transaction
            .chunk_payload(index, &self.buffer)
            .ok_or_else(|| UploadError::InvalidHeader(format!("no proof for chunk {}", index)))?;
        client.post_chunk(&payload).await?;

        self.state.chunks_uploaded += 1;
        self.state.uploaded_bytes += len as u64;

        tracing::debug!(
            transaction_id = %self.state.transaction_id,
            chunk_index = index,
            progress = %format!("{:.1}%", self.state.progress()),
            "Uploaded chunk"
        );

        Ok(&self.state)
    }
}

/// Sign and upload an archive file, returning the posted transaction.
///
/// The archive is streamed twice: once to compute the data root and once
/// while sending chunks. It is never held in memory as a whole.
pub async fn upload_archive(
    client: &dyn LedgerClient,
    identity: &Identity,
    path: &Path,
    tags: &[Tag],
) -> Result<Transaction, UploadError> {
    let size = tokio::fs::metadata(path).await?.len();

    let layout_path: PathBuf = path.to_path_buf();
    let layout = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&layout_path)?;
        ChunkLayout::from_reader(std::io::BufReader::new(file), size)
    })
    .await??;

    let reward = client.price(size).await?;
    let anchor = client.transaction_anchor().await?;

    let mut transport_tags = Vec::with_capacity(tags.len() + 1);
    transport_tags.push(Tag::new("Content-Type", ARCHIVE_CONTENT_TYPE));
    transport_tags.extend_from_slice(tags);

    let transaction = Transaction::sign(identity, layout, &anchor, &reward, &transport_tags)?;

    tracing::info!(
        transaction_id = %transaction.id(),
        size = size,
        reward = %reward,
        chunks = transaction.chunk_count(),
        "Uploading archive"
    );

    let mut uploader = TransactionUploader::new(transaction, path).await?;
    while !uploader.is_complete() {
        uploader.upload_chunk(client).await?;
    }

    tracing::info!(transaction_id = %uploader.state().transaction_id, "Upload complete");

    Ok(uploader.transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_support::test_jwk;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::merkle::MAX_CHUNK_SIZE;
    use crate::ledger::BASE64_URL;
    use base64::Engine;

    fn identity() -> Identity {
        Identity::from_jwk(&test_jwk()).unwrap()
    }

    fn write_archive(dir: &tempfile::TempDir, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        let path = dir.path().join("archive_v0.tar.gz");
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn test_upload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = write_archive(&dir, (2 * MAX_CHUNK_SIZE + 12_345) as usize);
        let ledger = MemoryLedger::new();

        let tx = upload_archive(&ledger, &identity(), &path, &[Tag::new("x-tag", "yes")])
            .await
            .unwrap();

        assert_eq!(ledger.data(tx.id()).unwrap(), data);
        assert_eq!(ledger.chunks_received(), 3);

        let tags: Vec<Tag> = tx.header().tags.iter().map(|t| t.decode_lossy()).collect();
        assert_eq!(
            tags,
            vec![
                Tag::new("Content-Type", "application/gzip"),
                Tag::new("x-tag", "yes")
            ]
        );
    }

    #[tokio::test]
    async fn test_uploader_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_archive(&dir, (MAX_CHUNK_SIZE + 100_000) as usize);
        let ledger = MemoryLedger::new();
        let identity = identity();

        let layout = ChunkLayout::from_bytes(&std::fs::read(&path).unwrap());
        let anchor = BASE64_URL.encode([1u8; 32]);
        let tx = Transaction::sign(&identity, layout, &anchor, "1", &[]).unwrap();
        let mut uploader = TransactionUploader::new(tx, &path).await.unwrap();

        assert!(!uploader.is_complete());
        assert!(uploader.upload_chunk(&ledger).await.unwrap().header_posted);

        let mut seen = Vec::new();
        while !uploader.is_complete() {
            let state = uploader.upload_chunk(&ledger).await.unwrap();
            seen.push(state.chunks_uploaded);
        }
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(uploader.state().uploaded_bytes, MAX_CHUNK_SIZE + 100_000);
        assert_eq!(uploader.state().progress(), 100.0);

        assert!(matches!(
            uploader.upload_chunk(&ledger).await,
            Err(UploadError::AlreadyComplete)
        ));
    }

    #[tokio::test]
    async fn test_mid_loop_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_archive(&dir, (3 * MAX_CHUNK_SIZE) as usize);
        let ledger = MemoryLedger::new();
        ledger.fail_chunks_after(1);

        let result = upload_archive(&ledger, &identity(), &path, &[]).await;

        assert!(matches!(result, Err(UploadError::Ledger(_))));
        assert_eq!(ledger.chunks_received(), 1);
    }

    #[tokio::test]
    async fn test_empty_archive_posts_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_archive(&dir, 0);
        let ledger = MemoryLedger::new();

        let tx = upload_archive(&ledger, &identity(), &path, &[]).await.unwrap();

        assert_eq!(tx.chunk_count(), 0);
        assert_eq!(ledger.chunks_received(), 0);
        assert_eq!(ledger.data(tx.id()).unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_missing_archive() {
        let ledger = MemoryLedger::new();
        let result = upload_archive(&ledger, &identity(), Path::new("/nonexistent/a.tar.gz"), &[]).await;
        assert!(matches!(result, Err(UploadError::Io(_))));
    }
}
