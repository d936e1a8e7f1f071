//! The capability boundary to the account portal.
//!
//! Everything that drives the real website (browser launch, iframe
//! discovery, form filling, pagination) lives behind [`PortalDriver`].
//! The rest of the service only ever sees handles, accounts, and raw
//! transaction records.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    account::Account,
    date::DateRange,
    job::ProgressUpdate,
    transaction::RawTransaction,
};

/// Errors reported by a portal driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The portal rejected the username/password pair.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A driver step did not finish in time.
    #[error("portal step timed out after {0:?}")]
    Timeout(Duration),

    /// The handle does not refer to a live login (already released).
    #[error("unknown or released portal handle")]
    UnknownHandle,

    /// Anything else the automation layer could not recover from.
    #[error("{0}")]
    Failure(String),
}

/// An opaque reference to one logged-in portal context.
///
/// Not `Clone`: whoever holds it is responsible for passing it back to
/// [`PortalDriver::release`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DriverHandle(Uuid);

impl DriverHandle {
    /// Mints a new handle. Only driver implementations should call this.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn forged(id: Uuid) -> Self {
        Self(id)
    }
}

/// Receives progress reports while transactions are being fetched.
pub type ProgressFn<'a> = dyn Fn(ProgressUpdate) + Send + Sync + 'a;

/// A portal automation backend.
#[async_trait]
pub trait PortalDriver: Send + Sync {
    /// Logs in. `interactive` asks for a visible browser a person can watch.
    async fn login(
        &self,
        user_id: &str,
        password: &str,
        interactive: bool,
    ) -> Result<DriverHandle, DriverError>;

    /// Lists the accounts (cards) visible to the logged-in user.
    async fn accounts(&self, handle: &DriverHandle) -> Result<Vec<Account>, DriverError>;

    /// Fetches the raw transactions within `range`, reporting progress as it goes.
    ///
    /// Progress percentages passed to `on_progress` never decrease.
    async fn transactions(
        &self,
        handle: &DriverHandle,
        range: &DateRange,
        on_progress: &ProgressFn<'_>,
    ) -> Result<Vec<RawTransaction>, DriverError>;

    /// Closes the browser context behind `handle`.
    async fn release(&self, handle: DriverHandle) -> Result<(), DriverError>;
}
