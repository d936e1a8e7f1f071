use axum::{
    Extension, Router,
    routing::{get, post},
};

use crate::{
    handlers::{accounts, auth, graphql, scrape, transactions},
    state::AppState,
};

/// Every API route, without the process-level layers added in `main`.
pub fn router(state: AppState) -> Router {
    let schema = graphql::build_schema(state.clone());

    Router::new()
        .route(
            "/user/{user_id}/auth",
            post(auth::authenticate).delete(auth::sign_out),
        )
        .route("/user/{user_id}/accounts", get(accounts::list_accounts))
        .route(
            "/user/{user_id}/accounts/{account_id}",
            get(accounts::get_account),
        )
        .route(
            "/user/{user_id}/transactions",
            get(transactions::list_transactions),
        )
        .route(
            "/user/{user_id}/transactions/{transaction_id}",
            get(transactions::get_transaction),
        )
        .route(
            "/user/{user_id}/account/{account_id}/transactions",
            get(transactions::account_transactions),
        )
        .route("/api/scrape", post(scrape::scrape))
        .route("/api/scrape/stream", get(scrape::scrape_stream))
        .route("/api/scrape/jobs", post(scrape::start_job))
        .route("/api/scrape/jobs/{job_id}", get(scrape::job_status))
        .route("/api/scrape/jobs/{job_id}/stream", get(scrape::job_stream))
        .route("/graphql", post(graphql::graphql))
        .layer(Extension(schema))
        .with_state(state)
}
