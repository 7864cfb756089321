//! Ledger client trait
//!
//! Everything the service needs from the remote store, behind one async
//! trait so routes and pipelines can run against an in-memory ledger in tests.

use async_trait::async_trait;
use axum::http::StatusCode;

use super::types::{ChunkPayload, SearchQuery, TransactionHeader, TransactionStatus};

/// Remote ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Ledger responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Not found on ledger: {0}")]
    NotFound(String),

    #[error("Unexpected ledger response: {0}")]
    InvalidResponse(String),

    #[error("Transaction data exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Local storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TooLarge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Network(_) | Self::Status { .. } | Self::InvalidResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Whether the ledger was reachable and answered at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Operations against the remote ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Reward in winston for storing `size` bytes
    async fn price(&self, size: u64) -> Result<String, LedgerError>;

    /// Balance of an address in winston
    async fn balance(&self, address: &str) -> Result<String, LedgerError>;

    /// Id of the last transaction sent from an address (empty if none)
    async fn last_transaction(&self, address: &str) -> Result<String, LedgerError>;

    /// Anchor to use as `last_tx` in a new transaction
    async fn transaction_anchor(&self) -> Result<String, LedgerError>;

    async fn transaction_status(&self, id: &str) -> Result<TransactionStatus, LedgerError>;

    /// Transaction header; `NotFound` if the id is unknown
    async fn transaction(&self, id: &str) -> Result<TransactionHeader, LedgerError>;

    /// Stream the data of a transaction into `out`, returning the byte count.
    /// Stops with `TooLarge` once more than `limit` bytes arrive.
    async fn download(
        &self,
        id: &str,
        out: &mut tokio::fs::File,
        limit: u64,
    ) -> Result<u64, LedgerError>;

    async fn post_transaction(&self, header: &TransactionHeader) -> Result<(), LedgerError>;

    async fn post_chunk(&self, chunk: &ChunkPayload) -> Result<(), LedgerError>;

    /// Ids of transactions matching the query, newest first
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            LedgerError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LedgerError::Status {
                status: 500,
                body: String::new()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            LedgerError::Io(std::io::Error::other("disk")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            LedgerError::TooLarge { limit: 1 }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
