//! Transaction endpoints
//!
//! - Cost estimates for a payload size
//! - Confirmation status and readable header metadata
//! - Raw download of the stored archive

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use super::require_transaction_id;
use crate::error::{AppError, Result};
use crate::ledger::{LedgerError, TransactionMetadata, TransactionStatus, ARCHIVE_CONTENT_TYPE};
use crate::state::AppState;
use crate::units::winston_to_ar_string;
use crate::verify::staging_dir;

const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    pub size_in_bytes: String,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub size_in_bytes: u64,
    pub estimate_ar: String,
    pub estimate_winston: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub transaction_id: String,
    pub transaction_url: String,
    #[serde(flatten)]
    pub status: TransactionStatus,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/estimate-cost", get(estimate_cost))
        .route("/:id/status", get(transaction_status))
        .route("/:id/metadata", get(transaction_metadata))
        .route("/:id/data", get(transaction_data))
}

async fn estimate_cost(
    State(state): State<AppState>,
    Query(query): Query<EstimateQuery>,
) -> Result<Json<EstimateResponse>> {
    let size = parse_size(&query.size_in_bytes)?;
    let winston = state.ledger().price(size).await?;
    let estimate_ar = winston_to_ar_string(&winston)
        .map_err(|e| LedgerError::InvalidResponse(format!("price: {}", e)))?;

    Ok(Json(EstimateResponse {
        size_in_bytes: size,
        estimate_ar,
        estimate_winston: winston,
    }))
}

/// Byte counts are accepted as plain digits only.
fn parse_size(raw: &str) -> Result<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::BadRequest(format!(
            "size_in_bytes must be a whole number of bytes, got {:?}",
            raw
        )));
    }
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("size_in_bytes is too large: {}", raw)))
}

async fn transaction_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    require_transaction_id(&id)?;

    let status = state.ledger().transaction_status(&id).await?;
    if status == TransactionStatus::NotFound {
        return Err(AppError::NotFound(format!("Transaction {} not found", id)));
    }

    Ok(Json(StatusResponse {
        transaction_url: state.urls().transaction_url(&id),
        transaction_id: id,
        status,
    }))
}

async fn transaction_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionMetadata>> {
    require_transaction_id(&id)?;
    let header = state.ledger().transaction(&id).await?;
    Ok(Json(header.into()))
}

/// Download the stored bytes to scratch space, then stream them back.
async fn transaction_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    require_transaction_id(&id)?;

    let scratch = staging_dir(state.config().packaging.staging_dir.as_deref())
        .map_err(|e| AppError::Internal(format!("Failed to create scratch directory: {}", e)))?;
    let path = scratch.path().join("data");

    let mut file = tokio::fs::File::create(&path).await.map_err(LedgerError::from)?;
    let size = state
        .ledger()
        .download(&id, &mut file, state.config().packaging.max_fetch_bytes)
        .await?;
    drop(file);

    tracing::debug!(transaction_id = %id, bytes = size, "Serving transaction data");

    let file = tokio::fs::File::open(&path).await.map_err(LedgerError::from)?;
    // The scratch directory lives as long as the body stream.
    let body = stream::try_unfold((file, scratch), |(mut file, scratch)| async move {
        let mut buf = vec![0u8; DOWNLOAD_BUFFER_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), (file, scratch))))
    });

    Ok((
        [
            (header::CONTENT_TYPE, ARCHIVE_CONTENT_TYPE.to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.tar.gz\"", id),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response())
}
