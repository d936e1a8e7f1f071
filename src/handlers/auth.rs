use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    error::Result,
    handlers::response::{JsonBody, json, required},
    models::session::Credentials,
    state::AppState,
    validation::auth::*,
};

/// The request payload for portal authentication.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub password: Option<String>,
    /// Log in with a visible browser.
    #[serde(alias = "interactive")]
    #[zeroize(skip)]
    pub show_browser: Option<bool>,
}

/// The response payload for authentication-related requests.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: String,
    pub authenticated: bool,
}

/// Logs the user into the portal and stores the session.
#[axum::debug_handler]
pub async fn authenticate(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    JsonBody(mut payload): JsonBody<AuthRequest>,
) -> Result<Response> {
    validate_user_id(&user_id)?;
    let password = Zeroizing::new(required(payload.password.take(), "password")?);
    validate_password(&password)?;

    let interactive = payload.show_browser.unwrap_or(false);
    tracing::info!("🔐 Authenticate request for {} (interactive: {})", user_id, interactive);

    let credentials = Credentials {
        user_id: user_id.clone(),
        password,
        interactive,
    };
    let session = state.sessions.authenticate(&credentials).await?;

    json(
        StatusCode::OK,
        &AuthResponse {
            user_id: session.user_id,
            authenticated: true,
        },
    )
}

/// Closes the user's portal session, if any.
#[axum::debug_handler]
pub async fn sign_out(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response> {
    validate_user_id(&user_id)?;
    state.sessions.close(&user_id).await;

    json(
        StatusCode::OK,
        &AuthResponse {
            user_id,
            authenticated: false,
        },
    )
}
