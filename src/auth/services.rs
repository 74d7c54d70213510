use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::otc::OneTimeCode;
use crate::auth::password;
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{AuthProvider, InsertOutcome, NewUser, OtcGuard, Role, User};
use crate::email::EmailSender;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Emails are identity keys; every flow sees them trimmed and lowercased.
pub(crate) fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn checked_email(raw: &str) -> Result<String, AuthError> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        return Err(AuthError::Validation("invalid email"));
    }
    Ok(email)
}

/// Local signup. Leaves the account pending until the emailed code is
/// verified. A repeat signup for a still-pending email overwrites the
/// provisional record instead of duplicating it, and losing the insert race
/// to a concurrent request re-routes down the same overwrite path.
pub async fn signup(
    store: &dyn UserStore,
    mailer: &dyn EmailSender,
    otc_ttl_minutes: i64,
    email: &str,
    password_plain: &str,
    name: &str,
) -> Result<(), AuthError> {
    let email = checked_email(email)?;
    password::check_policy(password_plain)?;

    let hash = password::hash_password(password_plain)?;
    let code = OneTimeCode::issue(otc_ttl_minutes);

    match store.find_by_email(&email).await? {
        Some(existing) if existing.is_provisional() => {
            if store
                .replace_provisional(&email, &hash, name, &code)
                .await?
                .is_none()
            {
                // Activated between the read and the write.
                return Err(AuthError::AccountExists);
            }
            info!(email = %email, "provisional signup overwritten");
        }
        Some(_) => return Err(AuthError::AccountExists),
        None => match store.insert(NewUser::local(&email, name, &hash, &code)).await? {
            InsertOutcome::Created(user) => {
                info!(user_id = %user.id, email = %email, "provisional user created");
            }
            InsertOutcome::DuplicateEmail => {
                // A concurrent signup won the insert. If its record is still
                // provisional this request simply refreshes it; otherwise the
                // address is taken.
                if store
                    .replace_provisional(&email, &hash, name, &code)
                    .await?
                    .is_none()
                {
                    return Err(AuthError::AccountExists);
                }
                info!(email = %email, "signup lost insert race, provisional overwritten");
            }
        },
    }

    if let Err(e) = mailer.send_code(&email, name, &code.code).await {
        // The record is already persisted; the caller must learn the account
        // exists but is unreachable.
        warn!(error = %e, email = %email, "verification email dispatch failed");
        return Err(AuthError::EmailDispatchFailed);
    }
    Ok(())
}

/// Activate a pending account with its emailed code. Wrong, expired,
/// consumed and unknown codes are indistinguishable to the caller.
pub async fn verify_otc(
    store: &dyn UserStore,
    email: &str,
    code: &str,
) -> Result<User, AuthError> {
    let email = normalize_email(email);
    let user = store
        .activate_with_code(&email, code.trim(), OffsetDateTime::now_utc())
        .await?
        .ok_or(AuthError::InvalidOrExpiredCode)?;
    info!(user_id = %user.id, email = %email, "account activated");
    Ok(user)
}

/// Regenerate and redispatch the signup code. Only meaningful while the
/// account is still pending.
pub async fn resend_otc(
    store: &dyn UserStore,
    mailer: &dyn EmailSender,
    otc_ttl_minutes: i64,
    email: &str,
) -> Result<(), AuthError> {
    let email = checked_email(email)?;
    let code = OneTimeCode::issue(otc_ttl_minutes);
    let user = store
        .store_otc(&email, OtcGuard::PendingSignup, &code)
        .await?
        .ok_or(AuthError::Validation("no account pending verification"))?;
    if let Err(e) = mailer.send_code(&email, &user.name, &code.code).await {
        warn!(error = %e, email = %email, "resend dispatch failed");
        return Err(AuthError::EmailDispatchFailed);
    }
    Ok(())
}

/// Password login. `VerificationRequired` is only reachable with a correct
/// password, so the two failure kinds never collapse.
pub async fn login(
    store: &dyn UserStore,
    email: &str,
    password_plain: &str,
) -> Result<User, AuthError> {
    let email = checked_email(email)?;
    let user = store
        .find_by_email(&email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    if user.auth_provider != AuthProvider::Local {
        warn!(email = %email, "password login against external-provider account");
        return Err(AuthError::InvalidCredentials);
    }
    let hash = user
        .password_hash
        .as_deref()
        .ok_or(AuthError::InvalidCredentials)?;
    if !password::verify_password(password_plain, hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials);
    }
    if user.is_provisional() {
        return Err(AuthError::VerificationRequired);
    }
    if !user.is_active() {
        return Err(AuthError::InvalidCredentials);
    }
    info!(user_id = %user.id, email = %email, "user logged in");
    Ok(user)
}

/// Start password recovery. Reuses the OTC mechanism but only against
/// active local accounts, so this path can never be used to verify a
/// never-activated or externally-authenticated one.
pub async fn forgot_password(
    store: &dyn UserStore,
    mailer: &dyn EmailSender,
    otc_ttl_minutes: i64,
    email: &str,
) -> Result<(), AuthError> {
    let email = checked_email(email)?;
    let code = OneTimeCode::issue(otc_ttl_minutes);
    let user = store
        .store_otc(&email, OtcGuard::ActiveLocal, &code)
        .await?
        .ok_or(AuthError::Validation("no active account for this email"))?;
    if let Err(e) = mailer.send_code(&email, &user.name, &code.code).await {
        warn!(error = %e, email = %email, "recovery dispatch failed");
        return Err(AuthError::EmailDispatchFailed);
    }
    Ok(())
}

pub async fn reset_password(
    store: &dyn UserStore,
    email: &str,
    code: &str,
    new_password: &str,
) -> Result<User, AuthError> {
    let email = normalize_email(email);
    password::check_policy(new_password)?;
    let hash = password::hash_password(new_password)?;
    let user = store
        .reset_password_with_code(&email, code.trim(), &hash, OffsetDateTime::now_utc())
        .await?
        .ok_or(AuthError::InvalidOrExpiredCode)?;
    info!(user_id = %user.id, email = %email, "password reset");
    Ok(user)
}

/// One-shot role assignment behind the role gate.
pub async fn set_role(
    store: &dyn UserStore,
    user_id: Uuid,
    role: Role,
) -> Result<User, AuthError> {
    match store.set_role(user_id, role).await? {
        Some(user) => {
            info!(user_id = %user.id, role = %role.as_str(), "role assigned");
            Ok(user)
        }
        None => match store.find_by_id(user_id).await? {
            Some(_) => Err(AuthError::RoleAlreadySet),
            None => Err(AuthError::Unauthenticated),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::testing::MemoryStore;
    use crate::auth::repo_types::AccountStatus;
    use crate::email::testing::RecordingMailer;
    use time::Duration;

    const EMAIL: &str = "a@x.com";
    const PASSWORD: &str = "password1";

    async fn signed_up(store: &MemoryStore, mailer: &RecordingMailer) {
        signup(store, mailer, 10, EMAIL, PASSWORD, "Ann")
            .await
            .expect("signup should succeed");
    }

    async fn activated(store: &MemoryStore, mailer: &RecordingMailer) -> User {
        signed_up(store, mailer).await;
        let code = mailer.last_code_for(EMAIL).unwrap();
        verify_otc(store, EMAIL, &code).await.expect("verify")
    }

    #[tokio::test]
    async fn signup_creates_provisional_user_and_sends_code() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;

        let user = store.find_by_email(EMAIL).await.unwrap().unwrap();
        assert_eq!(user.status, AccountStatus::PendingVerification);
        assert!(!user.email_verified);
        assert!(user.otc.is_some() && user.otc_expires_at.is_some());
        assert_eq!(mailer.last_code_for(EMAIL), user.otc);
    }

    #[tokio::test]
    async fn signup_normalizes_email() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signup(&store, &mailer, 10, "  A@X.CoM ", PASSWORD, "Ann")
            .await
            .unwrap();
        assert!(store.find_by_email(EMAIL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn signup_rejects_short_password_and_bad_email() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let err = signup(&store, &mailer, 10, EMAIL, "seven77", "Ann")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        let err = signup(&store, &mailer, 10, "not-an-email", PASSWORD, "Ann")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn repeat_signup_overwrites_provisional_without_duplicating() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;
        let first = store.find_by_email(EMAIL).await.unwrap().unwrap();

        signup(&store, &mailer, 10, EMAIL, "password2", "Anne")
            .await
            .unwrap();
        assert_eq!(store.user_count(), 1);
        let second = store.find_by_email(EMAIL).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Anne");
        assert_ne!(first.password_hash, second.password_hash);
    }

    #[tokio::test]
    async fn signup_on_active_account_is_account_exists() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        activated(&store, &mailer).await;
        let err = signup(&store, &mailer, 10, EMAIL, PASSWORD, "Ann")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountExists));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn losing_the_insert_race_overwrites_the_winner_when_provisional() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        // A competing signup commits between this request's read and insert.
        let competing = OneTimeCode::issue(10);
        store.stage_competitor(NewUser::local(EMAIL, "Rival", "hash", &competing));

        signed_up(&store, &mailer).await;
        assert_eq!(store.user_count(), 1);
        let user = store.find_by_email(EMAIL).await.unwrap().unwrap();
        // The loser's overwrite went through the provisional path.
        assert_eq!(user.name, "Ann");
        assert_eq!(mailer.last_code_for(EMAIL), user.otc);
    }

    #[tokio::test]
    async fn concurrent_signups_for_same_email_leave_one_record() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let (a, b) = tokio::join!(
            signup(&store, &mailer, 10, EMAIL, PASSWORD, "Ann"),
            signup(&store, &mailer, 10, EMAIL, PASSWORD, "Ann"),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn dispatch_failure_surfaces_distinctly_but_persists_the_account() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::failing();
        let err = signup(&store, &mailer, 10, EMAIL, PASSWORD, "Ann")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailDispatchFailed));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn verify_activates_exactly_once() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;
        let code = mailer.last_code_for(EMAIL).unwrap();

        let wrong = if code == "000000" { "000001" } else { "000000" };
        let err = verify_otc(&store, EMAIL, wrong).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));

        let user = verify_otc(&store, EMAIL, &code).await.unwrap();
        assert_eq!(user.status, AccountStatus::Active);
        assert!(user.email_verified);
        assert!(user.role.is_none());
        assert!(user.otc.is_none() && user.otc_expires_at.is_none());

        // Replaying the consumed code fails the same way as a wrong one.
        let err = verify_otc(&store, EMAIL, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));
    }

    #[tokio::test]
    async fn expired_code_fails_like_a_wrong_code() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;
        let stale = OneTimeCode {
            code: "123456".into(),
            expires_at: OffsetDateTime::now_utc() - Duration::minutes(1),
        };
        store
            .store_otc(EMAIL, OtcGuard::PendingSignup, &stale)
            .await
            .unwrap()
            .unwrap();
        let err = verify_otc(&store, EMAIL, "123456").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));
    }

    #[tokio::test]
    async fn resend_replaces_the_pending_code() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;
        resend_otc(&store, &mailer, 10, EMAIL).await.unwrap();

        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
        let user = store.find_by_email(EMAIL).await.unwrap().unwrap();
        assert_eq!(mailer.last_code_for(EMAIL), user.otc);

        let code = mailer.last_code_for(EMAIL).unwrap();
        verify_otc(&store, EMAIL, &code).await.unwrap();
        let err = resend_otc(&store, &mailer, 10, EMAIL).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn login_distinguishes_unverified_from_bad_credentials() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;

        let err = login(&store, EMAIL, "wrong-password").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // Correct password on a pending account routes to verification.
        let err = login(&store, EMAIL, PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::VerificationRequired));

        let code = mailer.last_code_for(EMAIL).unwrap();
        verify_otc(&store, EMAIL, &code).await.unwrap();
        let user = login(&store, EMAIL, PASSWORD).await.unwrap();
        assert_eq!(user.email, EMAIL);
    }

    #[tokio::test]
    async fn login_unknown_email_is_invalid_credentials() {
        let store = MemoryStore::new();
        let err = login(&store, "nobody@x.com", PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_rejects_external_provider_accounts() {
        let store = MemoryStore::new();
        store
            .insert(NewUser::external(
                AuthProvider::Google,
                "g-1",
                EMAIL,
                "Ann",
                None,
            ))
            .await
            .unwrap();
        let err = login(&store, EMAIL, PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn password_recovery_round_trip() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        activated(&store, &mailer).await;

        forgot_password(&store, &mailer, 10, EMAIL).await.unwrap();
        let code = mailer.last_code_for(EMAIL).unwrap();
        reset_password(&store, EMAIL, &code, "new-password-9")
            .await
            .unwrap();

        let err = login(&store, EMAIL, PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        login(&store, EMAIL, "new-password-9").await.unwrap();

        // The code was consumed by the reset.
        let err = reset_password(&store, EMAIL, &code, "another-pass-9")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));
    }

    #[tokio::test]
    async fn recovery_never_targets_pending_or_external_accounts() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;
        let err = forgot_password(&store, &mailer, 10, EMAIL).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        store
            .insert(NewUser::external(
                AuthProvider::Github,
                "gh-1",
                "ext@x.com",
                "Ext",
                None,
            ))
            .await
            .unwrap();
        let err = forgot_password(&store, &mailer, 10, "ext@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn role_gate_is_one_shot() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let user = activated(&store, &mailer).await;
        assert!(user.role.is_none());

        let updated = set_role(&store, user.id, Role::Mentor).await.unwrap();
        assert_eq!(updated.role, Some(Role::Mentor));

        let err = set_role(&store, user.id, Role::Learner).await.unwrap_err();
        assert!(matches!(err, AuthError::RoleAlreadySet));
        let still = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(still.role, Some(Role::Mentor));
    }

    #[tokio::test]
    async fn signup_to_role_selection_end_to_end() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        signed_up(&store, &mailer).await;

        let code = mailer.last_code_for(EMAIL).unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };
        let err = verify_otc(&store, EMAIL, wrong).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));

        let user = verify_otc(&store, EMAIL, &code).await.unwrap();
        assert!(user.role.is_none());

        set_role(&store, user.id, Role::Mentor).await.unwrap();
        let fetched = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.role, Some(Role::Mentor));
    }

    #[tokio::test]
    async fn set_role_for_missing_user_is_unauthenticated() {
        let store = MemoryStore::new();
        let err = set_role(&store, Uuid::new_v4(), Role::Mentor)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }
}
