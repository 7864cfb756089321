//! Search endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::require_address;
use crate::error::{AppError, Result};
use crate::ledger::{SearchQuery, Tag};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TagQuery {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct OwnerSearchResponse {
    pub wallet_address: String,
    pub total_transactions: usize,
    pub transactions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TagSearchResponse {
    pub tag_pair: Tag,
    pub total_transactions: usize,
    pub transactions: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/owner/:address", get(by_owner))
        .route("/tags", get(by_tag))
}

async fn by_owner(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<OwnerSearchResponse>> {
    require_address(&address)?;

    let transactions = search(&state, &SearchQuery::Owner(address.clone())).await?;
    Ok(Json(OwnerSearchResponse {
        wallet_address: address,
        total_transactions: transactions.len(),
        transactions,
    }))
}

async fn by_tag(
    State(state): State<AppState>,
    Query(query): Query<TagQuery>,
) -> Result<Json<TagSearchResponse>> {
    if query.name.is_empty() {
        return Err(AppError::BadRequest("Tag name must not be empty".to_string()));
    }

    let transactions = search(
        &state,
        &SearchQuery::Tag {
            name: query.name.clone(),
            value: query.value.clone(),
        },
    )
    .await?;

    Ok(Json(TagSearchResponse {
        tag_pair: Tag::new(query.name, query.value),
        total_transactions: transactions.len(),
        transactions,
    }))
}

/// Run a search and turn the ids into explorer links.
async fn search(state: &AppState, query: &SearchQuery) -> Result<Vec<String>> {
    let ids = state.ledger().search(query).await?;
    tracing::debug!(query = ?query, results = ids.len(), "Search complete");
    Ok(ids
        .iter()
        .map(|id| state.urls().transaction_url(id))
        .collect())
}
