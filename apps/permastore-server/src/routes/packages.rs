//! Package endpoints
//!
//! Publishing takes one multipart form:
//! - `wallet`: the key document that signs and pays
//! - `files`: repeated, one part per payload file (the part file name is kept)
//! - `package_name`: optional name of the package directory
//! - `tags`: optional JSON array of `{name, value}`, all sent on the
//!   transaction; those that fit a `Label: value` line also go in the manifest

use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use super::require_transaction_id;
use crate::error::{AppError, Result};
use crate::identity::IdentityError;
use crate::ledger::Tag;
use crate::package::{ArchiveRequest, PackageFile};
use crate::publish::PublishReceipt;
use crate::state::AppState;
use crate::verify::{fetch_and_validate, ValidationReport};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(publish_package))
        .route("/:id/validate", get(validate_package))
}

/// Fields collected from a publish form
#[derive(Debug, Default)]
struct PublishForm {
    wallet: Option<Vec<u8>>,
    request: ArchiveRequest,
}

async fn read_form(mut multipart: Multipart) -> Result<PublishForm> {
    let mut form = PublishForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "wallet" => form.wallet = Some(field.bytes().await?.to_vec()),
            "files" => form.request.files.push(read_file(field).await?),
            "package_name" => {
                let text = field.text().await?;
                let text = text.trim();
                if !text.is_empty() {
                    form.request.package_name = Some(text.to_string());
                }
            }
            "tags" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    form.request.tags = serde_json::from_str::<Vec<Tag>>(&text).map_err(|e| {
                        AppError::BadRequest(format!(
                            "tags must be a JSON array of {{\"name\", \"value\"}} objects: {}",
                            e
                        ))
                    })?;
                }
            }
            other => tracing::debug!("Ignoring unexpected form field '{}'", other),
        }
    }

    Ok(form)
}

async fn read_file(field: Field<'_>) -> Result<PackageFile> {
    let file_name = field
        .file_name()
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::BadRequest("Every 'files' part needs a file name".to_string()))?;
    let data = field.bytes().await?;

    tracing::debug!("Read {} bytes for '{}'", data.len(), file_name);
    Ok(PackageFile::new(file_name, data.to_vec()))
}

async fn publish_package(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PublishReceipt>> {
    let form = read_form(multipart).await?;
    let wallet = form.wallet.ok_or(IdentityError::Missing)?;

    let receipt = state.publisher().publish(&wallet, form.request).await?;
    Ok(Json(receipt))
}

async fn validate_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ValidationReport>)> {
    require_transaction_id(&id)?;

    let packaging = &state.config().packaging;
    let outcome = fetch_and_validate(
        state.ledger(),
        &id,
        packaging.staging_dir.as_deref(),
        packaging.max_fetch_bytes,
    )
    .await;

    let status = outcome.status_code();
    Ok((status, Json(ValidationReport::new(&id, state.urls(), outcome))))
}
