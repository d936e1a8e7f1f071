//! GraphQL over JSON at `/graphql`.
//!
//! Same semantics as the REST routes, minus the password fallback: every
//! query needs a session stored by a prior `authenticate`.

use async_graphql::{
    Context, EmptySubscription, ErrorExtensions, Object, Schema, SimpleObject,
};
use axum::{Extension, http::StatusCode, response::Response};
use std::collections::BTreeMap;
use zeroize::Zeroizing;

use crate::{
    error::{AppError, Result},
    handlers::response::{JsonBody, json},
    models::{account::Account, session::Credentials, transaction::NormalizedTransaction},
    services::{accounts as accounts_service, filter::TransactionFilter, transactions as transactions_service},
    state::AppState,
    validation::auth::{validate_password, validate_user_id},
};

pub type ApiSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(state: AppState) -> ApiSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(state)
        .finish()
}

/// Carries the REST status/kind pair into the error's `extensions`.
fn gql_error(err: AppError) -> async_graphql::Error {
    let kind = err.kind();
    let status = i32::from(err.status().as_u16());

    async_graphql::Error::new(err.public_message()).extend_with(|_, extensions| {
        extensions.set("kind", kind);
        extensions.set("status", status);
    })
}

fn app_state<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a AppState> {
    ctx.data::<AppState>()
}

#[derive(SimpleObject)]
pub struct AuthPayload {
    pub user_id: String,
    pub authenticated: bool,
}

/// A portal account (card).
pub struct GqlAccount(Account);

#[Object(name = "Account")]
impl GqlAccount {
    async fn account_id(&self) -> &str {
        &self.0.account_id
    }

    /// Every other field the portal reported, verbatim.
    async fn details(&self) -> async_graphql::Json<BTreeMap<String, serde_json::Value>> {
        async_graphql::Json(self.0.details.clone())
    }
}

#[derive(SimpleObject)]
#[graphql(name = "Transaction")]
pub struct GqlTransaction {
    pub transaction_id: String,
    /// RFC 3339, UTC.
    pub transaction_time: String,
    pub local_time: String,
    pub amount: String,
    pub currency: String,
    pub description: String,
    pub status: String,
    pub balance: Option<String>,
    pub account_id: String,
    pub mode: String,
}

impl From<NormalizedTransaction> for GqlTransaction {
    fn from(t: NormalizedTransaction) -> Self {
        Self {
            transaction_id: t.transaction_id,
            transaction_time: t.transaction_time.to_rfc3339(),
            local_time: t.local_time,
            amount: t.amount.to_string(),
            currency: t.currency,
            description: t.description,
            status: t.status,
            balance: t.balance.map(|b| b.to_string()),
            account_id: t.account_id,
            mode: t.mode,
        }
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn accounts(&self, ctx: &Context<'_>, user_id: String) -> async_graphql::Result<Vec<GqlAccount>> {
        let state = app_state(ctx)?;
        validate_user_id(&user_id).map_err(gql_error)?;

        let accounts = accounts_service::list_accounts(state, &user_id, None)
            .await
            .map_err(gql_error)?;
        Ok(accounts.into_iter().map(GqlAccount).collect())
    }

    async fn account(
        &self,
        ctx: &Context<'_>,
        user_id: String,
        account_id: String,
    ) -> async_graphql::Result<GqlAccount> {
        let state = app_state(ctx)?;
        validate_user_id(&user_id).map_err(gql_error)?;

        accounts_service::get_account(state, &user_id, &account_id, None)
            .await
            .map(GqlAccount)
            .map_err(gql_error)
    }

    /// Dates are `MM-DD-YYYY` (or with slashes), inclusive, in the validation timezone.
    async fn transactions(
        &self,
        ctx: &Context<'_>,
        user_id: String,
        start_date: Option<String>,
        end_date: Option<String>,
        account_id: Option<String>,
        mode: Option<String>,
    ) -> async_graphql::Result<Vec<GqlTransaction>> {
        let state = app_state(ctx)?;
        validate_user_id(&user_id).map_err(gql_error)?;

        let range = state
            .filter
            .parse_range(start_date.as_deref(), end_date.as_deref(), true)
            .map_err(gql_error)?;
        let filter = TransactionFilter {
            account_id: account_id.filter(|v| !v.trim().is_empty()),
            mode: mode.filter(|v| !v.trim().is_empty()),
            range,
        };

        let transactions = transactions_service::list_transactions(state, &user_id, None, &filter)
            .await
            .map_err(gql_error)?;
        Ok(transactions.into_iter().map(GqlTransaction::from).collect())
    }

    async fn transaction(
        &self,
        ctx: &Context<'_>,
        user_id: String,
        transaction_id: String,
    ) -> async_graphql::Result<GqlTransaction> {
        let state = app_state(ctx)?;
        validate_user_id(&user_id).map_err(gql_error)?;

        transactions_service::find_transaction(state, &user_id, &transaction_id, None)
            .await
            .map(GqlTransaction::from)
            .map_err(gql_error)
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn authenticate(
        &self,
        ctx: &Context<'_>,
        user_id: String,
        password: String,
        show_browser: Option<bool>,
    ) -> async_graphql::Result<AuthPayload> {
        let state = app_state(ctx)?;
        let password = Zeroizing::new(password);
        validate_user_id(&user_id).map_err(gql_error)?;
        validate_password(&password).map_err(gql_error)?;

        let credentials = Credentials {
            user_id,
            password,
            interactive: show_browser.unwrap_or(false),
        };
        let session = state
            .sessions
            .authenticate(&credentials)
            .await
            .map_err(gql_error)?;

        Ok(AuthPayload {
            user_id: session.user_id,
            authenticated: true,
        })
    }
}

/// Executes one GraphQL request.
pub async fn graphql(
    Extension(schema): Extension<ApiSchema>,
    JsonBody(request): JsonBody<async_graphql::Request>,
) -> Result<Response> {
    let response = schema.execute(request).await;
    json(StatusCode::OK, &response)
}
