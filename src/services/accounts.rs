use crate::{
    error::{AppError, Result},
    models::account::Account,
    state::AppState,
};

/// Lists the accounts visible to the user.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `user_id` - The portal user.
/// * `password` - Used to log in when the user has no stored session.
///
/// # Returns
///
/// A `Result` containing the driver-supplied accounts.
pub async fn list_accounts(
    state: &AppState,
    user_id: &str,
    password: Option<&str>,
) -> Result<Vec<Account>> {
    let lease = state.sessions.lease_or_login(user_id, password).await?;
    let accounts = state.driver.accounts(lease.handle()?).await?;

    tracing::debug!("📇 {} accounts for {}", accounts.len(), user_id);
    Ok(accounts)
}

/// Gets one account by id, or `NotFound`.
pub async fn get_account(
    state: &AppState,
    user_id: &str,
    account_id: &str,
    password: Option<&str>,
) -> Result<Account> {
    list_accounts(state, user_id, password)
        .await?
        .into_iter()
        .find(|account| account.account_id == account_id)
        .ok_or_else(|| AppError::NotFound(format!("Account {} not found", account_id)))
}
