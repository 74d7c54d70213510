use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::otc::OneTimeCode;

/// Which signup path originally created the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
    Github,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "local",
            AuthProvider::Google => "google",
            AuthProvider::Github => "github",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(AuthProvider::Local),
            "google" => Some(AuthProvider::Google),
            "github" => Some(AuthProvider::Github),
            _ => None,
        }
    }
}

/// Account lifecycle state. A `PendingVerification` account exists only to
/// hold an unverified OTC challenge and may be overwritten by a repeat
/// signup for the same email. `Suspended` is set out-of-band by admin
/// tooling, never by this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    PendingVerification,
    Active,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::PendingVerification => "pending_verification",
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_verification" => Some(AccountStatus::PendingVerification),
            "active" => Some(AccountStatus::Active),
            "suspended" => Some(AccountStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mentor,
    Learner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Mentor => "mentor",
            Role::Learner => "learner",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mentor" => Some(Role::Mentor),
            "learner" => Some(Role::Learner),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Canonical user record. One row per email address; the store's unique
/// index on email is the only thing enforcing that.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub auth_provider: AuthProvider,
    pub google_id: Option<String>,
    pub github_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub otc: Option<String>,
    #[serde(skip_serializing)]
    pub otc_expires_at: Option<OffsetDateTime>,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub role: Option<Role>,
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn is_provisional(&self) -> bool {
        self.status == AccountStatus::PendingVerification
    }

    pub fn provider_id(&self, provider: AuthProvider) -> Option<&str> {
        match provider {
            AuthProvider::Google => self.google_id.as_deref(),
            AuthProvider::Github => self.github_id.as_deref(),
            AuthProvider::Local => None,
        }
    }
}

/// Row to insert. Built through the two constructors so a local user always
/// carries a hash + pending code and an external user is born active.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub auth_provider: AuthProvider,
    pub google_id: Option<String>,
    pub github_id: Option<String>,
    pub password_hash: Option<String>,
    pub otc: Option<String>,
    pub otc_expires_at: Option<OffsetDateTime>,
    pub status: AccountStatus,
    pub email_verified: bool,
}

impl NewUser {
    pub fn local(email: &str, name: &str, password_hash: &str, code: &OneTimeCode) -> Self {
        Self {
            email: email.to_string(),
            name: name.to_string(),
            avatar: None,
            auth_provider: AuthProvider::Local,
            google_id: None,
            github_id: None,
            password_hash: Some(password_hash.to_string()),
            otc: Some(code.code.clone()),
            otc_expires_at: Some(code.expires_at),
            status: AccountStatus::PendingVerification,
            email_verified: false,
        }
    }

    pub fn external(
        provider: AuthProvider,
        provider_id: &str,
        email: &str,
        name: &str,
        avatar: Option<&str>,
    ) -> Self {
        let (google_id, github_id) = match provider {
            AuthProvider::Google => (Some(provider_id.to_string()), None),
            AuthProvider::Github => (None, Some(provider_id.to_string())),
            AuthProvider::Local => (None, None),
        };
        Self {
            email: email.to_string(),
            name: name.to_string(),
            avatar: avatar.map(str::to_string),
            auth_provider: provider,
            google_id,
            github_id,
            password_hash: None,
            otc: None,
            otc_expires_at: None,
            status: AccountStatus::Active,
            email_verified: true,
        }
    }
}

/// Result of an optimistic insert. `DuplicateEmail` is the expected shape of
/// losing a creation race and callers must handle it, not bubble it.
#[derive(Debug)]
pub enum InsertOutcome {
    Created(User),
    DuplicateEmail,
}

/// Which accounts a stored OTC may target: a pending signup challenge or a
/// password-recovery code for an already-active local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtcGuard {
    PendingSignup,
    ActiveLocal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            AccountStatus::PendingVerification,
            AccountStatus::Active,
            AccountStatus::Suspended,
        ] {
            assert_eq!(AccountStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::parse("deleted"), None);
    }

    #[test]
    fn external_user_is_born_active_and_verified() {
        let new = NewUser::external(
            AuthProvider::Google,
            "g-123",
            "a@x.com",
            "Ann",
            Some("https://pic"),
        );
        assert_eq!(new.status, AccountStatus::Active);
        assert!(new.email_verified);
        assert_eq!(new.google_id.as_deref(), Some("g-123"));
        assert!(new.github_id.is_none());
        assert!(new.password_hash.is_none());
    }

    #[test]
    fn password_hash_never_serializes() {
        let new = NewUser::external(AuthProvider::Github, "gh-1", "b@x.com", "Bo", None);
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            avatar: None,
            auth_provider: new.auth_provider,
            google_id: None,
            github_id: new.github_id,
            password_hash: Some("secret-hash".into()),
            otc: Some("123456".into()),
            otc_expires_at: None,
            status: new.status,
            email_verified: new.email_verified,
            role: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let json: serde_json::Value = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("otc").is_none());
        assert!(json.get("otc_expires_at").is_none());
    }
}
