//! Wallet endpoints
//!
//! Every lookup can be made either with a key document (multipart field
//! `wallet`) or with a plain address in the query string.

use axum::{
    extract::{Multipart, Query, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::require_address;
use crate::error::Result;
use crate::identity::{Identity, IdentityError};
use crate::ledger::LedgerError;
use crate::state::AppState;
use crate::units::winston_to_ar_string;

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub wallet_address: String,
    pub balance_ar: String,
    pub balance_winston: String,
}

#[derive(Debug, Serialize)]
pub struct LastTransactionResponse {
    pub wallet_address: String,
    /// Empty when the wallet has never sent a transaction
    pub last_transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/address", post(address_from_wallet))
        .route("/balance", post(balance_from_wallet).get(balance_by_address))
        .route(
            "/last-transaction",
            post(last_transaction_from_wallet).get(last_transaction_by_address),
        )
}

/// Read the key document from the `wallet` field of a multipart form.
pub(crate) async fn read_wallet(multipart: &mut Multipart) -> Result<Vec<u8>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("wallet") {
            let data = field.bytes().await?;
            tracing::debug!("Read {} bytes of wallet data", data.len());
            return Ok(data.to_vec());
        }
    }
    Err(IdentityError::Missing.into())
}

async fn identity_from(mut multipart: Multipart) -> Result<Identity> {
    let wallet = read_wallet(&mut multipart).await?;
    Ok(Identity::from_jwk(&wallet)?)
}

async fn address_from_wallet(multipart: Multipart) -> Result<Json<AddressResponse>> {
    let identity = identity_from(multipart).await?;
    Ok(Json(AddressResponse {
        wallet_address: identity.address().to_string(),
    }))
}

async fn balance_from_wallet(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<BalanceResponse>> {
    let identity = identity_from(multipart).await?;
    balance(&state, identity.address()).await
}

async fn balance_by_address(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<BalanceResponse>> {
    require_address(&query.wallet_address)?;
    balance(&state, &query.wallet_address).await
}

async fn balance(state: &AppState, address: &str) -> Result<Json<BalanceResponse>> {
    let winston = state.ledger().balance(address).await?;
    Ok(Json(BalanceResponse {
        wallet_address: address.to_string(),
        balance_ar: winston_to_ar_string(&winston)
            .map_err(|e| LedgerError::InvalidResponse(format!("balance: {}", e)))?,
        balance_winston: winston,
    }))
}

async fn last_transaction_from_wallet(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<LastTransactionResponse>> {
    let identity = identity_from(multipart).await?;
    last_transaction(&state, identity.address()).await
}

async fn last_transaction_by_address(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<LastTransactionResponse>> {
    require_address(&query.wallet_address)?;
    last_transaction(&state, &query.wallet_address).await
}

async fn last_transaction(state: &AppState, address: &str) -> Result<Json<LastTransactionResponse>> {
    let id = state.ledger().last_transaction(address).await?;
    let transaction_url = (!id.is_empty()).then(|| state.urls().transaction_url(&id));
    Ok(Json(LastTransactionResponse {
        wallet_address: address.to_string(),
        last_transaction_id: id,
        transaction_url,
    }))
}
