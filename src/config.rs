use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub session_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtcConfig {
    pub ttl_minutes: i64,
}

/// Transactional email API settings. When `api_url` is unset the app falls
/// back to a log-only sender (dev mode).
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub api_url: Option<String>,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub otc: OtcConfig,
    pub email: EmailConfig,
    pub google: OAuthProviderConfig,
    pub github: OAuthProviderConfig,
    /// Base URL this server is reachable at, used for provider redirect URIs.
    pub public_base_url: String,
    /// Frontend origin for post-OAuth redirects.
    pub frontend_url: String,
    /// Session cookies are marked Secure unless running against plain localhost.
    pub cookie_secure: bool,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: env_or("JWT_ISSUER", "mentorhub"),
            audience: env_or("JWT_AUDIENCE", "mentorhub-users"),
            session_ttl_days: env_parse_or("SESSION_TTL_DAYS", 7),
        };
        let otc = OtcConfig {
            ttl_minutes: env_parse_or("OTC_TTL_MINUTES", 10),
        };
        let email = EmailConfig {
            api_url: std::env::var("EMAIL_API_URL").ok(),
            api_key: env_or("EMAIL_API_KEY", ""),
            from: env_or("EMAIL_FROM", "no-reply@mentorhub.app"),
        };
        let google = OAuthProviderConfig {
            client_id: env_or("GOOGLE_CLIENT_ID", ""),
            client_secret: env_or("GOOGLE_CLIENT_SECRET", ""),
        };
        let github = OAuthProviderConfig {
            client_id: env_or("GITHUB_CLIENT_ID", ""),
            client_secret: env_or("GITHUB_CLIENT_SECRET", ""),
        };
        let public_base_url = env_or("PUBLIC_BASE_URL", "http://localhost:8080");
        let frontend_url = env_or("FRONTEND_URL", "http://localhost:5173");
        let cookie_secure =
            env_parse_or("COOKIE_SECURE", !public_base_url.starts_with("http://localhost"));

        Ok(Self {
            database_url,
            jwt,
            otc,
            email,
            google,
            github,
            public_base_url,
            frontend_url,
            cookie_secure,
        })
    }
}
