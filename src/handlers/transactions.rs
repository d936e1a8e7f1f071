use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::Result,
    handlers::response::{QueryParams, json},
    services::{
        filter::{FilterEngine, TransactionFilter},
        transactions as transactions_service,
    },
    state::AppState,
    validation::auth::validate_user_id,
};

/// Query-string filters for transaction listings. Future dates are allowed here.
#[derive(Deserialize, Default, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    pub password: Option<String>,
    #[zeroize(skip)]
    pub start_date: Option<String>,
    #[zeroize(skip)]
    pub end_date: Option<String>,
    #[zeroize(skip)]
    pub account_id: Option<String>,
    #[zeroize(skip)]
    pub mode: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl TransactionQuery {
    /// Validates the dates and collects the supplied constraints.
    pub fn to_filter(&self, engine: &FilterEngine) -> Result<TransactionFilter> {
        let range = engine.parse_range(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            true,
        )?;

        Ok(TransactionFilter {
            account_id: non_blank(&self.account_id),
            mode: non_blank(&self.mode),
            range,
        })
    }
}

/// Lists the user's normalized transactions.
#[axum::debug_handler]
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    QueryParams(query): QueryParams<TransactionQuery>,
) -> Result<Response> {
    validate_user_id(&user_id)?;
    let filter = query.to_filter(&state.filter)?;

    let transactions = transactions_service::list_transactions(
        &state,
        &user_id,
        query.password.as_deref(),
        &filter,
    )
    .await?;

    tracing::info!("📄 {} transactions for {}", transactions.len(), user_id);
    json(StatusCode::OK, &transactions)
}

/// Lists the transactions of one account.
#[axum::debug_handler]
pub async fn account_transactions(
    State(state): State<AppState>,
    Path((user_id, account_id)): Path<(String, String)>,
    QueryParams(query): QueryParams<TransactionQuery>,
) -> Result<Response> {
    validate_user_id(&user_id)?;
    let filter = query.to_filter(&state.filter)?;

    let transactions = transactions_service::account_transactions(
        &state,
        &user_id,
        &account_id,
        query.password.as_deref(),
        filter,
    )
    .await?;

    json(StatusCode::OK, &transactions)
}

#[axum::debug_handler]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path((user_id, transaction_id)): Path<(String, String)>,
    QueryParams(query): QueryParams<TransactionQuery>,
) -> Result<Response> {
    validate_user_id(&user_id)?;

    let transaction = transactions_service::find_transaction(
        &state,
        &user_id,
        &transaction_id,
        query.password.as_deref(),
    )
    .await?;

    json(StatusCode::OK, &transaction)
}
