//! A portal driver backed by canned data.
//!
//! Used for local runs (`PORTAL_FIXTURE=fixture.json`) and by the test
//! suite. It behaves like the browser driver at the capability boundary:
//! it checks passwords, hands out exclusive handles, reports progress per
//! account, and honours the requested date range in the portal's timezone.

use anyhow::Context;
use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::driver::portal::{DriverError, DriverHandle, PortalDriver, ProgressFn};
use crate::models::{
    account::Account,
    date::DateRange,
    job::ProgressUpdate,
    transaction::RawTransaction,
};

/// One portal login and everything it can see.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureUser {
    pub password: String,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    users: HashMap<String, FixtureUser>,
}

/// Call counters for assertions.
#[cfg(test)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    pub logins: usize,
    pub transaction_fetches: usize,
    pub releases: usize,
    pub live_handles: usize,
}

/// The canned-data portal driver.
pub struct FixtureDriver {
    users: HashMap<String, FixtureUser>,
    timezone: Tz,
    handles: Mutex<HashMap<Uuid, String>>,
    login_delay: Duration,
    logins: AtomicUsize,
    transaction_fetches: AtomicUsize,
    releases: AtomicUsize,
    fail_transactions: AtomicBool,
    fail_release: AtomicBool,
}

impl FixtureDriver {
    /// Creates a driver with no users; every login is rejected.
    pub fn new(timezone: Tz) -> Self {
        Self {
            users: HashMap::new(),
            timezone,
            handles: Mutex::new(HashMap::new()),
            login_delay: Duration::ZERO,
            logins: AtomicUsize::new(0),
            transaction_fetches: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            fail_transactions: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
        }
    }

    /// Loads users from a JSON file of the form `{"users": {"<id>": FixtureUser}}`.
    pub fn from_file(path: &Path, timezone: Tz) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read portal fixture {}", path.display()))?;
        let file: FixtureFile = sonic_rs::from_str(&raw)
            .with_context(|| format!("Invalid portal fixture {}", path.display()))?;

        let mut driver = Self::new(timezone);
        driver.users = file.users;
        Ok(driver)
    }

    /// Adds a user.
    #[cfg(test)]
    pub fn with_user(
        mut self,
        user_id: impl Into<String>,
        password: impl Into<String>,
        accounts: Vec<Account>,
        transactions: Vec<RawTransaction>,
    ) -> Self {
        self.users.insert(
            user_id.into(),
            FixtureUser {
                password: password.into(),
                accounts,
                transactions,
            },
        );
        self
    }

    /// Makes every login take at least `delay`.
    #[cfg(test)]
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    /// Makes transaction fetches fail until switched off again.
    #[cfg(test)]
    pub fn set_fail_transactions(&self, fail: bool) {
        self.fail_transactions.store(fail, Ordering::SeqCst);
    }

    /// Makes `release` report an error (the handle is still dropped).
    #[cfg(test)]
    pub fn set_fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    #[cfg(test)]
    pub fn stats(&self) -> DriverStats {
        DriverStats {
            logins: self.logins.load(Ordering::SeqCst),
            transaction_fetches: self.transaction_fetches.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
            live_handles: self.handles().len(),
        }
    }

    /// Whether the handle with this id has been issued and not yet released.
    #[cfg(test)]
    pub fn is_live(&self, handle_id: Uuid) -> bool {
        self.handles().contains_key(&handle_id)
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, String>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn user_for(&self, handle: &DriverHandle) -> Result<&FixtureUser, DriverError> {
        let user_id = self
            .handles()
            .get(&handle.id())
            .cloned()
            .ok_or(DriverError::UnknownHandle)?;

        self.users
            .get(&user_id)
            .ok_or_else(|| DriverError::Failure(format!("fixture user {} vanished", user_id)))
    }
}

#[async_trait]
impl PortalDriver for FixtureDriver {
    async fn login(
        &self,
        user_id: &str,
        password: &str,
        interactive: bool,
    ) -> Result<DriverHandle, DriverError> {
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }

        self.logins.fetch_add(1, Ordering::SeqCst);

        let user = self
            .users
            .get(user_id)
            .filter(|user| user.password == password)
            .ok_or(DriverError::InvalidCredentials)?;

        let handle = DriverHandle::mint();
        self.handles().insert(handle.id(), user_id.to_string());

        tracing::debug!(
            "🧪 Fixture login for {} (interactive: {}, {} accounts)",
            user_id,
            interactive,
            user.accounts.len()
        );

        Ok(handle)
    }

    async fn accounts(&self, handle: &DriverHandle) -> Result<Vec<Account>, DriverError> {
        Ok(self.user_for(handle)?.accounts.clone())
    }

    async fn transactions(
        &self,
        handle: &DriverHandle,
        range: &DateRange,
        on_progress: &ProgressFn<'_>,
    ) -> Result<Vec<RawTransaction>, DriverError> {
        let user = self.user_for(handle)?;
        self.transaction_fetches.fetch_add(1, Ordering::SeqCst);

        on_progress(ProgressUpdate::new(0, Some("Opening activity page".to_string())));

        if self.fail_transactions.load(Ordering::SeqCst) {
            return Err(DriverError::Failure(
                "activity page did not load".to_string(),
            ));
        }

        let total = user.accounts.len().max(1);
        for (index, account) in user.accounts.iter().enumerate() {
            let percent = ((index + 1) * 90 / total) as u8;
            on_progress(ProgressUpdate::new(
                percent,
                Some(format!("Reading card {}", account.account_id)),
            ));
        }

        let records: Vec<RawTransaction> = user
            .transactions
            .iter()
            .filter(|t| range.contains(t.time_utc.with_timezone(&self.timezone).date_naive()))
            .cloned()
            .collect();

        on_progress(ProgressUpdate::new(
            100,
            Some(format!("Collected {} transactions", records.len())),
        ));

        Ok(records)
    }

    async fn release(&self, handle: DriverHandle) -> Result<(), DriverError> {
        if self.handles().remove(&handle.id()).is_none() {
            return Err(DriverError::UnknownHandle);
        }

        self.releases.fetch_add(1, Ordering::SeqCst);

        if self.fail_release.load(Ordering::SeqCst) {
            return Err(DriverError::Failure("browser already closed".to_string()));
        }

        Ok(())
    }
}
