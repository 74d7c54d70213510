use std::time::Duration;

use axum::extract::FromRef;
use axum::http::HeaderValue;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::config::JwtConfig;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "access_token";

/// Signing/verification keys plus the settings baked into every token.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            session_ttl_days,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            session_ttl: Duration::from_secs((session_ttl_days as u64) * 24 * 3600),
            cookie_secure: state.config.cookie_secure,
        }
    }
}

impl JwtKeys {
    pub fn sign(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.session_ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "session token signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "session token verified");
        Ok(data.claims)
    }

    /// Set-Cookie value carrying the session token. HttpOnly, SameSite=Lax,
    /// Max-Age matching token validity, Secure outside local dev.
    pub fn session_cookie(&self, token: &str) -> anyhow::Result<HeaderValue> {
        let secure = if self.cookie_secure { "; Secure" } else { "" };
        let value = format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
            SESSION_COOKIE,
            token,
            self.session_ttl.as_secs(),
            secure
        );
        Ok(HeaderValue::from_str(&value)?)
    }

    /// Clearing must mirror every attribute used at set time or the browser
    /// keeps the cookie.
    pub fn clear_session_cookie(&self) -> anyhow::Result<HeaderValue> {
        let secure = if self.cookie_secure { "; Secure" } else { "" };
        let value = format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0; \
             Expires=Thu, 01 Jan 1970 00:00:00 GMT{}",
            SESSION_COOKIE, secure
        );
        Ok(HeaderValue::from_str(&value)?)
    }
}

/// Short-lived nonce cookie used to pin the OAuth callback to the browser
/// that started the flow.
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

pub fn oauth_state_cookie(state: &str, secure: bool) -> anyhow::Result<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    let value = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age=600{}",
        OAUTH_STATE_COOKIE, state, secure
    );
    Ok(HeaderValue::from_str(&value)?)
}

pub fn clear_oauth_state_cookie(secure: bool) -> anyhow::Result<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    let value = format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0; \
         Expires=Thu, 01 Jan 1970 00:00:00 GMT{}",
        OAUTH_STATE_COOKIE, secure
    );
    Ok(HeaderValue::from_str(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        let state = AppState::fake();
        JwtKeys::from_ref(&state)
    }

    #[tokio::test]
    async fn sign_and_verify_round_trip() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
    }

    #[tokio::test]
    async fn verify_rejects_wrong_issuer_or_audience() {
        let good = make_keys();
        let mut bad = make_keys();
        bad.issuer = "other-issuer".into();
        bad.audience = "other-aud".into();
        let token = good.sign(Uuid::new_v4()).expect("sign");
        assert!(bad.verify(&token).is_err());
    }

    #[tokio::test]
    async fn verify_rejects_tampered_token() {
        let keys = make_keys();
        let mut token = keys.sign(Uuid::new_v4()).expect("sign");
        token.push('x');
        assert!(keys.verify(&token).is_err());
    }

    #[tokio::test]
    async fn token_validity_window_matches_config() {
        let keys = make_keys();
        let token = keys.sign(Uuid::new_v4()).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(
            claims.exp - claims.iat,
            keys.session_ttl.as_secs() as usize
        );
    }

    #[tokio::test]
    async fn clear_cookie_mirrors_set_attributes() {
        let keys = make_keys();
        let set = keys.session_cookie("tok").unwrap();
        let clear = keys.clear_session_cookie().unwrap();
        let set = set.to_str().unwrap();
        let clear = clear.to_str().unwrap();
        for attr in ["HttpOnly", "SameSite=Lax", "Path=/"] {
            assert!(set.contains(attr), "set cookie missing {attr}");
            assert!(clear.contains(attr), "clear cookie missing {attr}");
        }
        assert_eq!(set.contains("Secure"), clear.contains("Secure"));
        assert!(clear.contains("Max-Age=0"));
        assert!(clear.starts_with("access_token=;"));
    }
}
