use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{AuthProvider, Role, User};

/// Request body for local signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtcRequest {
    pub email: String,
    pub otc: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendOtcRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otc: String,
    pub new_password: String,
}

/// Admin is provisioned out-of-band, so it is simply not a legal request
/// value here.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestedRole {
    Mentor,
    Learner,
}

impl From<RequestedRole> for Role {
    fn from(r: RequestedRole) -> Role {
        match r {
            RequestedRole::Mentor => Role::Mentor,
            RequestedRole::Learner => Role::Learner,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: RequestedRole,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub auth_provider: AuthProvider,
    pub role: Option<Role>,
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            avatar: u.avatar.clone(),
            auth_provider: u.auth_provider,
            role: u.role,
            created_at: u.created_at,
        }
    }
}

/// Response for operations that establish a session. The token itself rides
/// in the cookie; the body tells the client who they are and whether the
/// role gate still applies.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub needs_role_selection: bool,
}

impl AuthResponse {
    pub fn for_user(user: &User) -> Self {
        Self {
            user: PublicUser::from(user),
            needs_role_selection: user.role.is_none(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_role_rejects_admin() {
        assert!(serde_json::from_str::<RequestedRole>("\"mentor\"").is_ok());
        assert!(serde_json::from_str::<RequestedRole>("\"learner\"").is_ok());
        assert!(serde_json::from_str::<RequestedRole>("\"admin\"").is_err());
    }

    #[test]
    fn auth_response_flags_missing_role() {
        let new = crate::auth::repo_types::NewUser::external(
            AuthProvider::Google,
            "g-1",
            "a@x.com",
            "Ann",
            None,
        );
        let mut user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            avatar: None,
            auth_provider: new.auth_provider,
            google_id: new.google_id,
            github_id: None,
            password_hash: None,
            otc: None,
            otc_expires_at: None,
            status: new.status,
            email_verified: new.email_verified,
            role: None,
            created_at: OffsetDateTime::now_utc(),
        };
        assert!(AuthResponse::for_user(&user).needs_role_selection);
        user.role = Some(Role::Mentor);
        assert!(!AuthResponse::for_user(&user).needs_role_selection);
    }
}
