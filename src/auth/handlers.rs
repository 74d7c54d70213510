use axum::{
    extract::{FromRef, Query, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse,
            ResendOtcRequest, ResetPasswordRequest, SetRoleRequest, SignupRequest,
            VerifyOtcRequest,
        },
        error::AuthError,
        extractors::{parse_cookie, AuthUser},
        oauth::{self, ProviderClient},
        services,
        session::{self, JwtKeys, OAUTH_STATE_COOKIE},
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify-otc", post(verify_otc))
        .route("/auth/resend-otc", post(resend_otc))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/set-role", post(set_role))
}

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(google_start))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/github", get(github_start))
        .route("/auth/github/callback", get(github_callback))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<impl IntoResponse, AuthError> {
    services::signup(
        state.store.as_ref(),
        state.mailer.as_ref(),
        state.config.otc.ttl_minutes,
        &payload.email,
        &payload.password,
        &payload.name,
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "verification code sent",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn verify_otc(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtcRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let user = services::verify_otc(state.store.as_ref(), &payload.email, &payload.otc).await?;
    // The activating write is durable by now; only then mint the session.
    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id)?;
    let cookie = keys.session_cookie(&token)?;
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(AuthResponse::for_user(&user)),
    ))
}

#[instrument(skip(state, payload))]
pub async fn resend_otc(
    State(state): State<AppState>,
    Json(payload): Json<ResendOtcRequest>,
) -> Result<impl IntoResponse, AuthError> {
    services::resend_otc(
        state.store.as_ref(),
        state.mailer.as_ref(),
        state.config.otc.ttl_minutes,
        &payload.email,
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "verification code sent",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let user = services::login(state.store.as_ref(), &payload.email, &payload.password).await?;
    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id)?;
    let cookie = keys.session_cookie(&token)?;
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(AuthResponse::for_user(&user)),
    ))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    services::forgot_password(
        state.store.as_ref(),
        state.mailer.as_ref(),
        state.config.otc.ttl_minutes,
        &payload.email,
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "recovery code sent",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    services::reset_password(
        state.store.as_ref(),
        &payload.email,
        &payload.otc,
        &payload.new_password,
    )
    .await?;
    Ok(Json(MessageResponse {
        message: "password updated",
    }))
}

#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> Result<impl IntoResponse, AuthError> {
    let keys = JwtKeys::from_ref(&state);
    let cookie = keys.clear_session_cookie()?;
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(MessageResponse {
            message: "logged out",
        }),
    ))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::Unauthenticated)?;
    Ok(Json(AuthResponse::for_user(&user)))
}

#[instrument(skip(state, payload))]
pub async fn set_role(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = services::set_role(state.store.as_ref(), user_id, payload.role.into()).await?;
    Ok(Json(AuthResponse::for_user(&user)))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn google_start(State(state): State<AppState>) -> Result<Response, AuthError> {
    let client = state.google.clone();
    provider_start(&state, client.as_ref())
}

pub async fn github_start(State(state): State<AppState>) -> Result<Response, AuthError> {
    let client = state.github.clone();
    provider_start(&state, client.as_ref())
}

#[instrument(skip(state, headers, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let client = state.google.clone();
    provider_callback(&state, client.as_ref(), &headers, query).await
}

#[instrument(skip(state, headers, query))]
pub async fn github_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let client = state.github.clone();
    provider_callback(&state, client.as_ref(), &headers, query).await
}

fn provider_start(state: &AppState, client: &dyn ProviderClient) -> Result<Response, AuthError> {
    let nonce = oauth::state_nonce();
    let url = client.authorize_url(&nonce)?;
    let cookie = session::oauth_state_cookie(&nonce, state.config.cookie_secure)?;
    Ok((AppendHeaders([(SET_COOKIE, cookie)]), Redirect::temporary(&url)).into_response())
}

/// OAuth callbacks never answer with an error status: the user arrived via a
/// browser redirect, so every failure becomes a frontend redirect with a
/// stable reason code.
async fn provider_callback(
    state: &AppState,
    client: &dyn ProviderClient,
    headers: &HeaderMap,
    query: CallbackQuery,
) -> Response {
    let frontend = state.config.frontend_url.clone();
    let secure = state.config.cookie_secure;
    let fail = |reason: &str| -> Response {
        let url = format!("{frontend}/auth/error?reason={reason}");
        match session::clear_oauth_state_cookie(secure) {
            Ok(clear) => {
                (AppendHeaders([(SET_COOKIE, clear)]), Redirect::temporary(&url)).into_response()
            }
            Err(_) => Redirect::temporary(&url).into_response(),
        }
    };

    if let Some(e) = query.error.as_deref() {
        warn!(provider = %client.provider().as_str(), error = %e, "provider returned an error");
        return fail("provider_error");
    }
    let expected = parse_cookie(headers, OAUTH_STATE_COOKIE);
    if expected.is_none() || expected != query.state {
        warn!(provider = %client.provider().as_str(), "oauth state mismatch");
        return fail("state_mismatch");
    }
    let Some(code) = query.code else {
        return fail("provider_error");
    };

    let profile = match client.exchange_code(&code).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, provider = %client.provider().as_str(), "code exchange failed");
            return fail("provider_error");
        }
    };

    let user = match oauth::resolve_profile(state.store.as_ref(), client.provider(), &profile).await
    {
        Ok(resolution) => resolution.into_user(),
        Err(e) => {
            warn!(error = %e, provider = %client.provider().as_str(), "profile resolution failed");
            return fail(e.code());
        }
    };

    let keys = JwtKeys::from_ref(state);
    let cookies = keys
        .sign(user.id)
        .and_then(|token| keys.session_cookie(&token))
        .and_then(|session_cookie| {
            Ok((session_cookie, session::clear_oauth_state_cookie(secure)?))
        });
    let (session_cookie, clear_state) = match cookies {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "session issuance failed");
            return fail("internal");
        }
    };

    let dest = if user.role.is_none() {
        format!("{frontend}/select-role")
    } else {
        format!("{frontend}/dashboard")
    };
    (
        AppendHeaders([(SET_COOKIE, session_cookie), (SET_COOKIE, clear_state)]),
        Redirect::temporary(&dest),
    )
        .into_response()
}
