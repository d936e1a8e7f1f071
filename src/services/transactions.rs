use std::sync::Arc;

use crate::{
    error::{AppError, Result},
    models::{date::DateRange, job::ProgressUpdate, transaction::NormalizedTransaction},
    services::{accounts, filter::TransactionFilter, normalizer::normalize_all, sessions::SessionLease},
    state::AppState,
};

/// Fetches through a leased session, normalizes, and replaces the user's stored result set.
async fn refresh(
    state: &AppState,
    lease: SessionLease,
    range: &DateRange,
) -> Result<Arc<Vec<NormalizedTransaction>>> {
    let user_id = lease.session().user_id.clone();
    let on_progress = |update: ProgressUpdate| {
        tracing::debug!("📥 Fetching for {}: {}%", user_id, update.percent);
    };

    let raw = state
        .driver
        .transactions(lease.handle()?, range, &on_progress)
        .await?;
    drop(lease);

    let normalized = Arc::new(normalize_all(&raw));
    state.store.replace(&user_id, normalized.clone()).await;
    Ok(normalized)
}

/// Fetches the user's transactions and applies every constraint in `filter`.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `user_id` - The portal user.
/// * `password` - Used to log in when the user has no stored session.
/// * `filter` - Account, mode, and date constraints.
///
/// # Returns
///
/// A `Result` containing the matching normalized transactions, in portal order.
pub async fn list_transactions(
    state: &AppState,
    user_id: &str,
    password: Option<&str>,
    filter: &TransactionFilter,
) -> Result<Vec<NormalizedTransaction>> {
    let lease = state.sessions.lease_or_login(user_id, password).await?;
    let all = refresh(state, lease, &filter.range).await?;
    Ok(state.filter.filter(&all, filter))
}

/// Like [`list_transactions`], scoped to one account.
///
/// An unknown account is `NotFound` before any transaction is fetched.
pub async fn account_transactions(
    state: &AppState,
    user_id: &str,
    account_id: &str,
    password: Option<&str>,
    filter: TransactionFilter,
) -> Result<Vec<NormalizedTransaction>> {
    accounts::get_account(state, user_id, account_id, password).await?;

    let filter = TransactionFilter {
        account_id: Some(account_id.to_string()),
        ..filter
    };
    list_transactions(state, user_id, password, &filter).await
}

/// Looks a transaction up by its synthetic id.
///
/// Checks the stored result set first and refreshes it once on a miss.
/// When ids collide the first record in portal order wins.
pub async fn find_transaction(
    state: &AppState,
    user_id: &str,
    transaction_id: &str,
    password: Option<&str>,
) -> Result<NormalizedTransaction> {
    let lease = state.sessions.lease_or_login(user_id, password).await?;

    if let Some(found) = state.store.find(user_id, transaction_id).await {
        return Ok(found);
    }

    refresh(state, lease, &DateRange::unbounded())
        .await?
        .iter()
        .find(|t| t.transaction_id == transaction_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))
}
