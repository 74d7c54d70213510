use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::session::{JwtKeys, SESSION_COOKIE};

pub(crate) fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

/// Resolves the session in front of every protected operation. Reads the
/// session cookie, falls back to a Bearer header for non-browser clients;
/// every failure collapses to a single unauthenticated rejection.
#[derive(Debug)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);

        let token = parse_cookie(&parts.headers, SESSION_COOKIE).or_else(|| {
            parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });
        let token = token.ok_or(AuthError::Unauthenticated)?;

        match keys.verify(&token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            Err(_) => {
                warn!("invalid or expired session token");
                Err(AuthError::Unauthenticated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parse_cookie_picks_the_named_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access_token=abc.def.ghi; lang=en"),
        );
        assert_eq!(
            parse_cookie(&headers, SESSION_COOKIE).as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(parse_cookie(&headers, "missing"), None);
    }

    #[test]
    fn parse_cookie_without_header_is_none() {
        assert_eq!(parse_cookie(&HeaderMap::new(), SESSION_COOKIE), None);
    }

    #[tokio::test]
    async fn bearer_header_authenticates_when_cookie_missing() {
        let state = crate::state::AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id).unwrap();

        let req = axum::http::Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let AuthUser(resolved) = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("bearer token should authenticate");
        assert_eq!(resolved, user_id);
    }

    #[tokio::test]
    async fn cleared_or_absent_cookie_is_unauthenticated() {
        let state = crate::state::AppState::fake();

        // What a browser holds right after logout: the cookie cleared to an
        // empty value.
        let req = axum::http::Request::builder()
            .header(header::COOKIE, "access_token=")
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));

        let req = axum::http::Request::builder().body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }
}
