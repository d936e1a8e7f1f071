use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Portal credentials for a single login attempt.
///
/// ⚠️ Never stored: the password is wiped from memory when this value drops.
#[derive(Clone)]
pub struct Credentials {
    /// The portal username; also the key of the session table.
    pub user_id: String,
    pub password: Zeroizing<String>,
    /// Whether a person is watching the login (visible browser, may be re-prompted).
    pub interactive: bool,
}

impl Credentials {
    /// Creates a new `Credentials`.
    pub fn new(user_id: impl Into<String>, password: impl Into<String>, interactive: bool) -> Self {
        Self {
            user_id: user_id.into(),
            password: Zeroizing::new(password.into()),
            interactive,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .field("interactive", &self.interactive)
            .finish()
    }
}

/// Represents an authenticated portal session.
///
/// The driver handle backing it stays inside the session manager; this is
/// the shareable description of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Distinguishes successive sessions of the same user.
    pub session_id: Uuid,
    /// The user this session belongs to.
    pub user_id: String,
    /// The timestamp when the login succeeded.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh session record for `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }
}
