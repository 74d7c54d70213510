use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use thiserror::Error;
use tracing::error;

/// Identity-resolution failures. Every public auth operation returns one of
/// these instead of throwing past the flow boundary; each variant maps to a
/// stable, non-leaking client message.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("email already registered")]
    AccountExists,

    /// A concurrent request created the account first and linking could not
    /// recover (the record vanished between the lost insert and the re-read).
    #[error("account was just created elsewhere, sign in to continue")]
    AccountExistsRace,

    /// Wrong, expired, consumed and unknown codes all collapse here.
    #[error("invalid or expired code")]
    InvalidOrExpiredCode,

    #[error("invalid credentials")]
    InvalidCredentials,

    /// The password was right but the account never finished verification.
    /// Kept distinct from `InvalidCredentials` so clients can route to the
    /// verification screen.
    #[error("account not verified")]
    VerificationRequired,

    /// The account record exists but the code never reached the user.
    #[error("account created but the verification email could not be sent")]
    EmailDispatchFailed,

    #[error("identity provider did not supply a usable email")]
    ProviderProfileIncomplete,

    #[error("role already chosen")]
    RoleAlreadySet,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) | AuthError::InvalidOrExpiredCode => StatusCode::BAD_REQUEST,
            AuthError::AccountExists
            | AuthError::AccountExistsRace
            | AuthError::RoleAlreadySet => StatusCode::CONFLICT,
            AuthError::InvalidCredentials | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::VerificationRequired => StatusCode::FORBIDDEN,
            AuthError::EmailDispatchFailed => StatusCode::BAD_GATEWAY,
            AuthError::ProviderProfileIncomplete => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag, also used as the reason code on OAuth
    /// failure redirects.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation",
            AuthError::AccountExists => "account_exists",
            AuthError::AccountExistsRace => "account_exists_race",
            AuthError::InvalidOrExpiredCode => "invalid_or_expired_code",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::VerificationRequired => "verification_required",
            AuthError::EmailDispatchFailed => "email_dispatch_failed",
            AuthError::ProviderProfileIncomplete => "provider_profile_incomplete",
            AuthError::RoleAlreadySet => "role_already_set",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Internal detail stays in the logs; clients only ever see the
        // stable message.
        if let AuthError::Internal(ref e) = self {
            error!(error = %e, "auth internal error");
        }
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_failures_stay_distinguishable() {
        assert_ne!(
            AuthError::InvalidCredentials.status(),
            AuthError::VerificationRequired.status()
        );
        assert_ne!(
            AuthError::InvalidCredentials.code(),
            AuthError::VerificationRequired.code()
        );
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let err = AuthError::Internal(anyhow::anyhow!("pg pool exhausted at 10.0.0.3"));
        assert_eq!(err.to_string(), "internal error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AuthError::AccountExists.status(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::InvalidOrExpiredCode.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::EmailDispatchFailed.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AuthError::ProviderProfileIncomplete.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
