use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::error::AuthError;
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{AuthProvider, InsertOutcome, NewUser, User};
use crate::config::OAuthProviderConfig;

/// What a provider callback boils down to once the code exchange and
/// profile fetch are done.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// One client per provider, composed into `AppState` at startup. Keeping
/// this a plain trait (instead of a process-global strategy registry) means
/// tests can drop in a canned profile.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> AuthProvider;

    /// Consent-screen URL carrying the CSRF state nonce.
    fn authorize_url(&self, state: &str) -> anyhow::Result<String>;

    /// Exchange the callback code for the user's profile.
    async fn exchange_code(&self, code: &str) -> anyhow::Result<ProviderProfile>;
}

/// Random nonce pinning a callback to the browser that started the flow.
pub fn state_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// How a callback profile resolved into a canonical user.
#[derive(Debug)]
pub enum Resolution {
    /// Fast path: the provider id is already on file.
    Returning(User),
    /// The email already had an account; the provider id was attached to it.
    Linked(User),
    /// A brand-new account.
    Created(User),
}

impl Resolution {
    pub fn user(&self) -> &User {
        match self {
            Resolution::Returning(u) | Resolution::Linked(u) | Resolution::Created(u) => u,
        }
    }

    pub fn into_user(self) -> User {
        match self {
            Resolution::Returning(u) | Resolution::Linked(u) | Resolution::Created(u) => u,
        }
    }
}

/// Resolve a provider profile into the canonical user record.
///
/// Lookup order: provider id, then email (linking), then optimistic
/// creation. Creation racing a concurrent request for the same email is
/// expected: the unique index rejects the write, the record is re-read and
/// the flow falls through to linking instead of failing.
pub async fn resolve_profile(
    store: &dyn UserStore,
    provider: AuthProvider,
    profile: &ProviderProfile,
) -> Result<Resolution, AuthError> {
    let email = match profile.email.as_deref() {
        Some(e) if !e.trim().is_empty() => crate::auth::services::normalize_email(e),
        // No usable email: fail closed, no record, no session.
        _ => {
            warn!(provider = %provider.as_str(), "provider profile carries no email");
            return Err(AuthError::ProviderProfileIncomplete);
        }
    };
    let name = profile.name.clone().unwrap_or_default();
    let avatar = profile.avatar.as_deref();

    if let Some(user) = store
        .find_by_provider(provider, &profile.provider_id)
        .await?
    {
        return Ok(Resolution::Returning(user));
    }

    if let Some(user) = store.find_by_email(&email).await? {
        let linked = store
            .link_provider(user.id, provider, &profile.provider_id, &name, avatar)
            .await?;
        info!(user_id = %linked.id, provider = %provider.as_str(), "provider linked to existing account");
        return Ok(Resolution::Linked(linked));
    }

    let new = NewUser::external(provider, &profile.provider_id, &email, &name, avatar);
    match store.insert(new).await? {
        InsertOutcome::Created(user) => {
            info!(user_id = %user.id, provider = %provider.as_str(), "user created from provider profile");
            Ok(Resolution::Created(user))
        }
        InsertOutcome::DuplicateEmail => {
            // A concurrent request created the account between our lookup
            // and our insert. Link to whatever won.
            match store.find_by_email(&email).await? {
                Some(user) => {
                    let linked = store
                        .link_provider(user.id, provider, &profile.provider_id, &name, avatar)
                        .await?;
                    info!(user_id = %linked.id, provider = %provider.as_str(), "creation race resolved by linking");
                    Ok(Resolution::Linked(linked))
                }
                None => Err(AuthError::AccountExistsRace),
            }
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleClient {
    client: reqwest::Client,
    config: OAuthProviderConfig,
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleClient {
    pub const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    pub const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";
    pub const USERINFO_URL: &'static str = "https://openidconnect.googleapis.com/v1/userinfo";

    pub fn new(config: OAuthProviderConfig, redirect_uri: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            redirect_uri,
        }
    }
}

#[async_trait]
impl ProviderClient for GoogleClient {
    fn provider(&self) -> AuthProvider {
        AuthProvider::Google
    }

    fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        let url = reqwest::Url::parse_with_params(
            Self::AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> anyhow::Result<ProviderProfile> {
        let tokens: TokenResponse = self
            .client
            .post(Self::TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("google token request")?
            .error_for_status()
            .context("google token exchange rejected")?
            .json()
            .await
            .context("google token response")?;

        let info: GoogleUserInfo = self
            .client
            .get(Self::USERINFO_URL)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .context("google userinfo request")?
            .error_for_status()
            .context("google userinfo rejected")?
            .json()
            .await
            .context("google userinfo response")?;

        Ok(ProviderProfile {
            provider_id: info.sub,
            email: info.email,
            name: info.name,
            avatar: info.picture,
        })
    }
}

pub struct GithubClient {
    client: reqwest::Client,
    config: OAuthProviderConfig,
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// GitHub hides private addresses on `/user`; the primary verified entry
/// from `/user/emails` stands in when present.
fn primary_verified_email(emails: Vec<GithubEmail>) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

impl GithubClient {
    pub const AUTH_URL: &'static str = "https://github.com/login/oauth/authorize";
    pub const TOKEN_URL: &'static str = "https://github.com/login/oauth/access_token";
    pub const USER_URL: &'static str = "https://api.github.com/user";
    pub const EMAILS_URL: &'static str = "https://api.github.com/user/emails";

    pub fn new(config: OAuthProviderConfig, redirect_uri: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            redirect_uri,
        }
    }
}

#[async_trait]
impl ProviderClient for GithubClient {
    fn provider(&self) -> AuthProvider {
        AuthProvider::Github
    }

    fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        let url = reqwest::Url::parse_with_params(
            Self::AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", "read:user user:email"),
                ("state", state),
            ],
        )?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> anyhow::Result<ProviderProfile> {
        let tokens: TokenResponse = self
            .client
            .post(Self::TOKEN_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .context("github token request")?
            .error_for_status()
            .context("github token exchange rejected")?
            .json()
            .await
            .context("github token response")?;

        let user: GithubUser = self
            .client
            .get(Self::USER_URL)
            .bearer_auth(&tokens.access_token)
            .header(reqwest::header::USER_AGENT, "mentorhub")
            .send()
            .await
            .context("github user request")?
            .error_for_status()
            .context("github user rejected")?
            .json()
            .await
            .context("github user response")?;

        let email = match user.email {
            Some(e) => Some(e),
            None => {
                let emails: Vec<GithubEmail> = self
                    .client
                    .get(Self::EMAILS_URL)
                    .bearer_auth(&tokens.access_token)
                    .header(reqwest::header::USER_AGENT, "mentorhub")
                    .send()
                    .await
                    .context("github emails request")?
                    .error_for_status()
                    .context("github emails rejected")?
                    .json()
                    .await
                    .context("github emails response")?;
                primary_verified_email(emails)
            }
        };

        Ok(ProviderProfile {
            provider_id: user.id.to_string(),
            email,
            name: user.name.or(Some(user.login)),
            avatar: user.avatar_url,
        })
    }
}
