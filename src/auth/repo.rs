use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::otc::OneTimeCode;
use crate::auth::repo_types::{
    AccountStatus, AuthProvider, InsertOutcome, NewUser, OtcGuard, Role, User,
};

/// Single source of truth for identity. All mutations that carry a
/// correctness invariant (activation, role assignment, password reset) are
/// guarded single-row updates so each transition fires at most once, and
/// creation is an optimistic insert arbitrated by the unique email index.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_provider(
        &self,
        provider: AuthProvider,
        provider_id: &str,
    ) -> anyhow::Result<Option<User>>;

    async fn insert(&self, new: NewUser) -> anyhow::Result<InsertOutcome>;

    /// Overwrite a pending local signup in place. Returns None when no
    /// provisional row exists for the email.
    async fn replace_provisional(
        &self,
        email: &str,
        password_hash: &str,
        name: &str,
        code: &OneTimeCode,
    ) -> anyhow::Result<Option<User>>;

    /// Store a fresh code on an account matching the guard (pending signup
    /// for resend, active local for password recovery).
    async fn store_otc(
        &self,
        email: &str,
        guard: OtcGuard,
        code: &OneTimeCode,
    ) -> anyhow::Result<Option<User>>;

    /// Atomically consume a live code and activate the account. Any
    /// mismatch (wrong code, expired, already active, no such user) returns
    /// None; the row guard makes a second verification of the same code
    /// impossible.
    async fn activate_with_code(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    /// Attach a provider id to an existing record, backfilling name/avatar
    /// when absent and forcing the account active and verified.
    async fn link_provider(
        &self,
        user_id: Uuid,
        provider: AuthProvider,
        provider_id: &str,
        name: &str,
        avatar: Option<&str>,
    ) -> anyhow::Result<User>;

    /// Consume a live recovery code and replace the password. Scoped to
    /// active local accounts.
    async fn reset_password_with_code(
        &self,
        email: &str,
        code: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    /// One-shot role assignment; None when a role was already chosen.
    async fn set_role(&self, user_id: Uuid, role: Role) -> anyhow::Result<Option<User>>;
}

const USER_COLUMNS: &str = "id, email, name, avatar, auth_provider, google_id, github_id, \
     password_hash, otc, otc_expires_at, status, email_verified, role, created_at";

/// Raw row shape; enum text is parsed on the way out so the rest of the
/// crate only ever sees the typed `User`.
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    avatar: Option<String>,
    auth_provider: String,
    google_id: Option<String>,
    github_id: Option<String>,
    password_hash: Option<String>,
    otc: Option<String>,
    otc_expires_at: Option<OffsetDateTime>,
    status: String,
    email_verified: bool,
    role: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> anyhow::Result<User> {
        let auth_provider = AuthProvider::parse(&row.auth_provider)
            .with_context(|| format!("unknown auth provider {:?}", row.auth_provider))?;
        let status = AccountStatus::parse(&row.status)
            .with_context(|| format!("unknown account status {:?}", row.status))?;
        let role = match row.role.as_deref() {
            None => None,
            Some(r) => Some(Role::parse(r).with_context(|| format!("unknown role {:?}", r))?),
        };
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            avatar: row.avatar,
            auth_provider,
            google_id: row.google_id,
            github_id: row.github_id,
            password_hash: row.password_hash,
            otc: row.otc,
            otc_expires_at: row.otc_expires_at,
            status,
            email_verified: row.email_verified,
            role,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn provider_column(provider: AuthProvider) -> anyhow::Result<&'static str> {
    match provider {
        AuthProvider::Google => Ok("google_id"),
        AuthProvider::Github => Ok("github_id"),
        AuthProvider::Local => anyhow::bail!("local is not an external provider"),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_provider(
        &self,
        provider: AuthProvider,
        provider_id: &str,
    ) -> anyhow::Result<Option<User>> {
        let column = provider_column(provider)?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn insert(&self, new: NewUser) -> anyhow::Result<InsertOutcome> {
        let sql = format!(
            "INSERT INTO users (id, email, name, avatar, auth_provider, google_id, github_id, \
             password_hash, otc, otc_expires_at, status, email_verified) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {USER_COLUMNS}"
        );
        let result = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.avatar)
            .bind(new.auth_provider.as_str())
            .bind(&new.google_id)
            .bind(&new.github_id)
            .bind(&new.password_hash)
            .bind(&new.otc)
            .bind(new.otc_expires_at)
            .bind(new.status.as_str())
            .bind(new.email_verified)
            .fetch_one(&self.pool)
            .await;
        match result {
            Ok(row) => Ok(InsertOutcome::Created(row.try_into()?)),
            // The unique index rejected the write: a concurrent request got
            // there first. Expected outcome, the caller re-reads and links.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::DuplicateEmail)
            }
            Err(e) => Err(e).context("insert user"),
        }
    }

    async fn replace_provisional(
        &self,
        email: &str,
        password_hash: &str,
        name: &str,
        code: &OneTimeCode,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "UPDATE users \
             SET password_hash = $2, name = $3, otc = $4, otc_expires_at = $5 \
             WHERE email = $1 AND status = 'pending_verification' AND auth_provider = 'local' \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .bind(password_hash)
            .bind(name)
            .bind(&code.code)
            .bind(code.expires_at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn store_otc(
        &self,
        email: &str,
        guard: OtcGuard,
        code: &OneTimeCode,
    ) -> anyhow::Result<Option<User>> {
        let predicate = match guard {
            OtcGuard::PendingSignup => "status = 'pending_verification'",
            OtcGuard::ActiveLocal => "status = 'active' AND auth_provider = 'local'",
        };
        let sql = format!(
            "UPDATE users SET otc = $2, otc_expires_at = $3 \
             WHERE email = $1 AND {predicate} \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .bind(&code.code)
            .bind(code.expires_at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn activate_with_code(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "UPDATE users \
             SET status = 'active', email_verified = TRUE, otc = NULL, otc_expires_at = NULL \
             WHERE email = $1 AND otc = $2 AND otc_expires_at > $3 \
               AND status = 'pending_verification' \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .bind(code)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn link_provider(
        &self,
        user_id: Uuid,
        provider: AuthProvider,
        provider_id: &str,
        name: &str,
        avatar: Option<&str>,
    ) -> anyhow::Result<User> {
        let column = provider_column(provider)?;
        let sql = format!(
            "UPDATE users \
             SET {column} = $2, \
                 name = CASE WHEN name = '' THEN $3 ELSE name END, \
                 avatar = COALESCE(avatar, $4), \
                 status = 'active', email_verified = TRUE \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .bind(provider_id)
            .bind(name)
            .bind(avatar)
            .fetch_one(&self.pool)
            .await
            .context("link provider")?;
        row.try_into()
    }

    async fn reset_password_with_code(
        &self,
        email: &str,
        code: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "UPDATE users \
             SET password_hash = $2, otc = NULL, otc_expires_at = NULL \
             WHERE email = $1 AND otc = $3 AND otc_expires_at > $4 \
               AND status = 'active' AND auth_provider = 'local' \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .bind(new_hash)
            .bind(code)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "UPDATE users SET role = $2 WHERE id = $1 AND role IS NULL \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }
}
