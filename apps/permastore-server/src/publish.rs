//! Publish pipeline
//!
//! identity -> funds check -> file check -> package -> sign -> upload -> status
//!
//! Everything that can be rejected cheaply is rejected before a staging
//! directory exists or any data is sent.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;

use crate::identity::{Identity, IdentityError};
use crate::ledger::{upload_archive, LedgerClient, LedgerError, PublicUrls, Tag, UploadError};
use crate::package::{fits_manifest, ArchiveBuilder, ArchiveRequest, PackagingError};
use crate::units::parse_winston;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Insufficient funds: wallet balance is {balance} winston")]
    InsufficientFunds { balance: String },

    #[error("No files were selected for upload")]
    NoFiles,

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PublishError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Identity(_) | Self::NoFiles => StatusCode::BAD_REQUEST,
            Self::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Ledger(e) => e.status_code(),
            Self::Packaging(e) => e.status_code(),
            Self::Upload(e) => e.status_code(),
            Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// Receipt
// ============================================================================

/// Result of a successful publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub transaction_id: String,
    pub transaction_url: String,
    pub data_url: String,
    pub package_name: String,
    pub archive_size: u64,
    /// Status right after upload; `unknown` if the query failed
    pub transaction_status: String,
    /// Balance in winston after upload, if it could be read
    pub wallet_balance: Option<String>,
    /// Where the archive was kept, when archives are retained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
    /// Tags sent on the transaction but left out of `bag-info.txt`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transport_only_tags: Vec<Tag>,
}

// ============================================================================
// Publisher
// ============================================================================

/// Packages files and stores them on the ledger
#[derive(Clone)]
pub struct Publisher {
    ledger: Arc<dyn LedgerClient>,
    builder: ArchiveBuilder,
    urls: PublicUrls,
    retain_archives: bool,
}

impl Publisher {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        builder: ArchiveBuilder,
        urls: PublicUrls,
        retain_archives: bool,
    ) -> Self {
        Self {
            ledger,
            builder,
            urls,
            retain_archives,
        }
    }

    /// Every caller tag goes on the transaction as given. Tags that cannot be
    /// written as a `Label: value` line are kept out of the manifest.
    pub async fn publish(
        &self,
        wallet: &[u8],
        mut request: ArchiveRequest,
    ) -> Result<PublishReceipt, PublishError> {
        let identity = Identity::from_jwk(wallet)?;

        let balance = self.ledger.balance(identity.address()).await?;
        let winston = parse_winston(&balance)
            .map_err(|e| LedgerError::InvalidResponse(format!("balance {:?}: {}", balance, e)))?;
        if winston == 0 {
            return Err(PublishError::InsufficientFunds { balance });
        }

        if request.files.is_empty() {
            return Err(PublishError::NoFiles);
        }

        let tags = request.tags.clone();
        let (manifest_tags, transport_only_tags): (Vec<Tag>, Vec<Tag>) =
            std::mem::take(&mut request.tags)
                .into_iter()
                .partition(|tag| tag.name.is_empty() || fits_manifest(tag));
        request.tags = manifest_tags;
        if !transport_only_tags.is_empty() {
            tracing::debug!(
                count = transport_only_tags.len(),
                "Tags kept off the manifest"
            );
        }

        let builder = self.builder.clone();
        let archive = tokio::task::spawn_blocking(move || builder.build(&request)).await??;

        tracing::info!(
            address = %identity.address(),
            balance = %balance,
            package = %archive.package_name,
            "Publishing package"
        );

        let transaction =
            upload_archive(self.ledger.as_ref(), &identity, &archive.path, &tags).await?;
        let id = transaction.id().to_string();

        let transaction_status = match self.ledger.transaction_status(&id).await {
            Ok(status) => status.to_string(),
            Err(e) => {
                tracing::warn!(transaction_id = %id, "Status query failed after upload: {}", e);
                "unknown".to_string()
            }
        };

        let wallet_balance = match self.ledger.balance(identity.address()).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!(address = %identity.address(), "Balance query failed after upload: {}", e);
                None
            }
        };

        let package_name = archive.package_name.clone();
        let archive_size = archive.size;
        let archive_path = self.retain_archives.then(|| archive.persist());

        tracing::info!(
            transaction_id = %id,
            status = %transaction_status,
            "Package published"
        );

        Ok(PublishReceipt {
            transaction_url: self.urls.transaction_url(&id),
            data_url: self.urls.data_url(&id),
            transaction_id: id,
            package_name,
            archive_size,
            transaction_status,
            wallet_balance,
            archive_path,
            transport_only_tags,
        })
    }
}
