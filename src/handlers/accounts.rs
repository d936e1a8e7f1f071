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
    services::accounts as accounts_service,
    state::AppState,
    validation::auth::validate_user_id,
};

/// Optional password for users without a stored session.
#[derive(Deserialize, Default, Zeroize, ZeroizeOnDrop)]
pub struct PasswordQuery {
    pub password: Option<String>,
}

/// Lists the user's accounts.
#[axum::debug_handler]
pub async fn list_accounts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    QueryParams(query): QueryParams<PasswordQuery>,
) -> Result<Response> {
    validate_user_id(&user_id)?;

    let accounts =
        accounts_service::list_accounts(&state, &user_id, query.password.as_deref()).await?;

    json(StatusCode::OK, &accounts)
}

/// Gets one of the user's accounts.
#[axum::debug_handler]
pub async fn get_account(
    State(state): State<AppState>,
    Path((user_id, account_id)): Path<(String, String)>,
    QueryParams(query): QueryParams<PasswordQuery>,
) -> Result<Response> {
    validate_user_id(&user_id)?;

    let account =
        accounts_service::get_account(&state, &user_id, &account_id, query.password.as_deref())
            .await?;

    json(StatusCode::OK, &account)
}
