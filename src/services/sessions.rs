//! The user → portal session table.
//!
//! One live session per user. Each entry owns its driver handle behind its
//! own async mutex, so work on one user's portal context is serialized
//! while other users proceed independently. Replacing or closing a session
//! waits for in-flight work on the old handle, then releases it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    driver::portal::{DriverError, DriverHandle, PortalDriver},
    error::{AppError, Result},
    models::session::{Credentials, Session},
};

type HandleSlot = Arc<Mutex<Option<DriverHandle>>>;

struct SessionEntry {
    session: Session,
    handle: HandleSlot,
}

/// Releases a freshly issued handle unless it was handed over to the table.
///
/// Covers the window between a successful login and the table insert,
/// including the caller's future being dropped mid-way.
struct PendingHandle {
    driver: Arc<dyn PortalDriver>,
    handle: Option<DriverHandle>,
}

impl PendingHandle {
    fn take(&mut self) -> Option<DriverHandle> {
        self.handle.take()
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let driver = self.driver.clone();
                runtime.spawn(async move {
                    if let Err(e) = driver.release(handle).await {
                        tracing::warn!("⚠️ Failed to release abandoned portal handle: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("⚠️ Portal handle abandoned outside a runtime; not released"),
        }
    }
}

/// Exclusive use of one user's portal handle for the duration of a request.
pub struct SessionLease {
    session: Session,
    guard: OwnedMutexGuard<Option<DriverHandle>>,
}

impl SessionLease {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The leased handle; `NotAuthenticated` if it was released before the lease was granted.
    pub fn handle(&self) -> Result<&DriverHandle> {
        self.guard.as_ref().ok_or(AppError::NotAuthenticated)
    }
}

/// Owns every authenticated portal handle.
#[derive(Clone)]
pub struct SessionManager {
    driver: Arc<dyn PortalDriver>,
    login_timeout: Duration,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl SessionManager {
    pub fn new(driver: Arc<dyn PortalDriver>, login_timeout: Duration) -> Self {
        Self {
            driver,
            login_timeout,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Logs in through the driver and stores the session under `credentials.user_id`.
    ///
    /// A previous session for the same user is replaced and its handle
    /// released; release failures are logged, never returned. Rejected
    /// credentials are returned as-is whether or not the login is
    /// interactive: re-prompting is the caller's business.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Session> {
        let user_id = credentials.user_id.as_str();
        tracing::debug!("🔐 Portal login for: {}", user_id);

        let login = self.driver.login(
            user_id,
            credentials.password.as_str(),
            credentials.interactive,
        );

        let handle = match tokio::time::timeout(self.login_timeout, login).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(DriverError::InvalidCredentials)) => {
                tracing::warn!("❌ Portal rejected credentials for: {}", user_id);
                return Err(AppError::InvalidCredentials);
            }
            Ok(Err(e)) => {
                tracing::error!("❌ Portal login failed for {}: {}", user_id, e);
                return Err(AppError::Driver(e.to_string()));
            }
            Err(_) => {
                tracing::error!("❌ Portal login timed out for {}", user_id);
                return Err(AppError::Driver(
                    DriverError::Timeout(self.login_timeout).to_string(),
                ));
            }
        };

        let mut pending = PendingHandle {
            driver: self.driver.clone(),
            handle: Some(handle),
        };

        let session = Session::new(user_id);

        let previous = {
            let mut sessions = self.sessions.lock().await;
            let handle = pending
                .take()
                .ok_or_else(|| AppError::Internal("login handle went missing".to_string()))?;

            sessions.insert(
                user_id.to_string(),
                SessionEntry {
                    session: session.clone(),
                    handle: Arc::new(Mutex::new(Some(handle))),
                },
            )
        };

        if let Some(previous) = previous {
            tracing::info!(
                "🔁 Replacing session {} for {}",
                previous.session.session_id,
                user_id
            );
            self.release_detached(previous).await;
        }

        tracing::info!("✅ Session {} stored for {}", session.session_id, user_id);
        Ok(session)
    }

    /// The stored session for `user_id`.
    pub async fn get(&self, user_id: &str) -> Result<Session> {
        self.sessions
            .lock()
            .await
            .get(user_id)
            .map(|entry| entry.session.clone())
            .ok_or(AppError::NotAuthenticated)
    }

    /// Waits for exclusive use of the user's handle.
    pub async fn lease(&self, user_id: &str) -> Result<SessionLease> {
        let (session, slot) = {
            let sessions = self.sessions.lock().await;
            let entry = sessions.get(user_id).ok_or(AppError::NotAuthenticated)?;
            (entry.session.clone(), entry.handle.clone())
        };

        let guard = slot.lock_owned().await;
        if guard.is_none() {
            return Err(AppError::NotAuthenticated);
        }

        Ok(SessionLease { session, guard })
    }

    /// Leases the stored session, or logs in non-interactively with `password` when there is none.
    pub async fn lease_or_login(&self, user_id: &str, password: Option<&str>) -> Result<SessionLease> {
        match self.lease(user_id).await {
            Err(AppError::NotAuthenticated) => {
                let Some(password) = password.filter(|p| !p.is_empty()) else {
                    return Err(AppError::NotAuthenticated);
                };
                self.authenticate(&Credentials::new(user_id, password, false))
                    .await?;
                self.lease(user_id).await
            }
            other => other,
        }
    }

    /// Closes whatever session `user_id` has. Idempotent.
    pub async fn close(&self, user_id: &str) {
        let removed = self.sessions.lock().await.remove(user_id);

        match removed {
            Some(entry) => {
                tracing::info!("👋 Closing session {} for {}", entry.session.session_id, user_id);
                self.release_detached(entry).await;
            }
            None => tracing::debug!("No session to close for {}", user_id),
        }
    }

    /// Closes `session` only if it is still the stored one for its user.
    ///
    /// Returns whether a session was closed.
    pub async fn close_session(&self, session: &Session) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&session.user_id) {
                Some(entry) if entry.session.session_id == session.session_id => {
                    sessions.remove(&session.user_id)
                }
                _ => None,
            }
        };

        match removed {
            Some(entry) => {
                tracing::info!("👋 Closing session {} for {}", session.session_id, session.user_id);
                self.release_detached(entry).await;
                true
            }
            None => {
                tracing::debug!(
                    "Session {} for {} already replaced or closed",
                    session.session_id,
                    session.user_id
                );
                false
            }
        }
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Releases an entry's handle on a separate task and waits for it.
    ///
    /// The task finishes even if the caller is dropped while waiting.
    async fn release_detached(&self, entry: SessionEntry) {
        let driver = self.driver.clone();
        let SessionEntry { session, handle } = entry;

        let task = tokio::spawn(async move {
            let Some(handle) = handle.lock().await.take() else {
                return;
            };

            match driver.release(handle).await {
                Ok(()) => tracing::debug!("✅ Released portal handle of session {}", session.session_id),
                Err(e) => tracing::warn!(
                    "⚠️ Failed to release portal handle of session {}: {}",
                    session.session_id,
                    e
                ),
            }
        });

        if let Err(e) = task.await {
            tracing::error!("❌ Portal release task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fixture::{FixtureDriver, samples::alice_driver};

    fn manager(driver: &Arc<FixtureDriver>) -> SessionManager {
        SessionManager::new(driver.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn second_login_replaces_and_releases_first() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);

        let first = sessions
            .authenticate(&Credentials::new("alice", "correct-pw", false))
            .await
            .unwrap();
        let first_handle = sessions.lease("alice").await.unwrap().handle().unwrap().id();

        let second = sessions
            .authenticate(&Credentials::new("alice", "correct-pw", false))
            .await
            .unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(sessions.active_count().await, 1);
        assert_eq!(sessions.get("alice").await.unwrap(), second);
        assert!(!driver.is_live(first_handle));
        assert_eq!(driver.stats().live_handles, 1);
    }

    #[tokio::test]
    async fn rejected_login_stores_nothing() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);

        let err = sessions
            .authenticate(&Credentials::new("alice", "wrong-pw", true))
            .await
            .unwrap_err();

        assert_eq!(err, AppError::InvalidCredentials);
        assert_eq!(sessions.get("alice").await.unwrap_err(), AppError::NotAuthenticated);
        assert_eq!(driver.stats().logins, 1);
    }

    #[tokio::test]
    async fn login_timeout_is_a_driver_failure() {
        let driver = Arc::new(alice_driver().with_login_delay(Duration::from_millis(200)));
        let sessions = SessionManager::new(driver.clone(), Duration::from_millis(20));

        let err = sessions
            .authenticate(&Credentials::new("alice", "correct-pw", false))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Driver(_)));
        assert_eq!(sessions.active_count().await, 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_swallows_release_errors() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);
        sessions
            .authenticate(&Credentials::new("alice", "correct-pw", false))
            .await
            .unwrap();

        driver.set_fail_release(true);
        sessions.close("alice").await;
        sessions.close("alice").await;

        assert_eq!(sessions.active_count().await, 0);
        assert_eq!(driver.stats().releases, 1);
        assert_eq!(driver.stats().live_handles, 0);
    }

    #[tokio::test]
    async fn close_session_ignores_replaced_sessions() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);
        let creds = Credentials::new("alice", "correct-pw", false);

        let old = sessions.authenticate(&creds).await.unwrap();
        let current = sessions.authenticate(&creds).await.unwrap();

        assert!(!sessions.close_session(&old).await);
        assert_eq!(sessions.get("alice").await.unwrap(), current);
        assert!(sessions.close_session(&current).await);
        assert_eq!(sessions.active_count().await, 0);
    }

    #[tokio::test]
    async fn replacement_waits_for_leased_handle() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);
        let creds = Credentials::new("alice", "correct-pw", false);
        sessions.authenticate(&creds).await.unwrap();

        let lease = sessions.lease("alice").await.unwrap();
        let leased_id = lease.handle().unwrap().id();

        let replacer = {
            let sessions = sessions.clone();
            let creds = creds.clone();
            tokio::spawn(async move { sessions.authenticate(&creds).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(driver.is_live(leased_id), "handle released while still leased");

        drop(lease);
        replacer.await.unwrap().unwrap();
        assert!(!driver.is_live(leased_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_logins_keep_one_session_and_release_the_rest() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);

        let logins: Vec<_> = (0..16)
            .map(|_| {
                let sessions = sessions.clone();
                tokio::spawn(async move {
                    sessions
                        .authenticate(&Credentials::new("alice", "correct-pw", false))
                        .await
                })
            })
            .collect();

        let mut issued = Vec::new();
        for login in logins {
            issued.push(login.await.unwrap().unwrap().session_id);
        }

        let stored = sessions.get("alice").await.unwrap();
        assert!(issued.contains(&stored.session_id));
        assert_eq!(sessions.active_count().await, 1);
        assert_eq!(driver.stats().live_handles, 1);
        assert_eq!(driver.stats().releases, 15);
    }

    #[tokio::test]
    async fn cancelled_login_releases_its_handle() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);

        let table = sessions.sessions.lock().await;
        let login = {
            let sessions = sessions.clone();
            tokio::spawn(async move {
                sessions
                    .authenticate(&Credentials::new("alice", "correct-pw", false))
                    .await
            })
        };

        // The login completes, then parks waiting for the table.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(driver.stats().logins, 1);
        assert_eq!(driver.stats().live_handles, 1);

        login.abort();
        assert!(login.await.unwrap_err().is_cancelled());
        drop(table);

        tokio::time::timeout(Duration::from_secs(1), async {
            while driver.stats().live_handles > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("abandoned handle was never released");
        assert_eq!(sessions.active_count().await, 0);
    }

    #[tokio::test]
    async fn lease_or_login_prefers_the_stored_session() {
        let driver = Arc::new(alice_driver());
        let sessions = manager(&driver);

        assert_eq!(
            sessions.lease_or_login("alice", None).await.err(),
            Some(AppError::NotAuthenticated)
        );

        let first = sessions.lease_or_login("alice", Some("correct-pw")).await.unwrap();
        let session_id = first.session().session_id;
        drop(first);

        let again = sessions.lease_or_login("alice", Some("ignored")).await.unwrap();
        assert_eq!(again.session().session_id, session_id);
        assert_eq!(driver.stats().logins, 1);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let driver = Arc::new(
            FixtureDriver::new(chrono_tz::UTC)
                .with_user("alice", "a", vec![], vec![])
                .with_user("bob", "b", vec![], vec![]),
        );
        let sessions = manager(&driver);

        sessions.authenticate(&Credentials::new("alice", "a", false)).await.unwrap();
        sessions.authenticate(&Credentials::new("bob", "b", false)).await.unwrap();
        sessions.close("alice").await;

        assert!(sessions.get("bob").await.is_ok());
        assert_eq!(sessions.active_count().await, 1);
    }
}
