use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::credentials::{self, Credential};
use crate::errors::AuthError;
use crate::manager::{DeriveRequest, IssuedToken};
use crate::middleware::auth::AuthContext;
use crate::models::token::{TokenKind, TokenView};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    /// Defaults to the configured session lifetime.
    pub ttl_seconds: Option<i64>,
    pub kind: Option<TokenKind>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeriveTokenRequest {
    pub ttl_seconds: Option<i64>,
    pub description: Option<String>,
    pub cluster_id: Option<String>,
}

/// Returned once at issuance. `token` is the only copy of the secret.
#[derive(Serialize)]
pub struct IssuedTokenResponse {
    pub token: String,
    #[serde(flatten)]
    pub info: TokenView,
}

impl IssuedTokenResponse {
    fn new(issued: &IssuedToken, now: chrono::DateTime<chrono::Utc>, current: bool) -> Self {
        Self {
            token: issued.credential().encode().expose().to_string(),
            info: issued.token.view(now, current),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /v3/tokens/login: exchange an identity-provider assertion for a token
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let principal = state.identity.authenticate(&headers).await?;
    let kind = payload.kind.unwrap_or(TokenKind::Session);
    let ttl = payload.ttl_seconds.unwrap_or(state.config.session_ttl_secs);

    let issued = state
        .manager
        .create_from_credential(&principal, ttl, kind, payload.description)
        .await?;

    let body = IssuedTokenResponse::new(&issued, state.manager.now(), kind == TokenKind::Session);
    let mut resp = (StatusCode::CREATED, Json(body)).into_response();

    if kind == TokenKind::Session {
        let max_age = (ttl > 0).then_some(ttl);
        set_session_cookie(
            &mut resp,
            &issued.credential(),
            max_age,
            state.config.cookie_secure,
        );
    }
    Ok(resp)
}

/// POST /v3/tokens: derive a token from the one authenticating this request
pub async fn derive_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<DeriveTokenRequest>,
) -> Result<(StatusCode, Json<IssuedTokenResponse>), AuthError> {
    let issued = state
        .manager
        .derive(
            &ctx.credential,
            DeriveRequest {
                ttl_seconds: payload.ttl_seconds.unwrap_or(0),
                description: payload.description,
                cluster_id: payload.cluster_id,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedTokenResponse::new(&issued, state.manager.now(), false)),
    ))
}

/// GET /v3/tokens: tokens visible to the caller, newest first
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<TokenView>>, AuthError> {
    let now = state.manager.now();
    let tokens = state.manager.list(&ctx.caller()).await?;
    Ok(Json(
        tokens
            .iter()
            .map(|t| t.view(now, ctx.is_current(&t.id)))
            .collect(),
    ))
}

/// GET /v3/tokens/:id
pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<TokenView>, AuthError> {
    let token = state.manager.get_by_id(&id, &ctx.caller()).await?;
    Ok(Json(token.view(state.manager.now(), ctx.is_current(&id))))
}

/// POST /v3/tokens/logout: disable the token carrying this request
pub async fn logout_current(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Response, AuthError> {
    state.manager.logout(&ctx.token_id, &ctx.caller()).await?;
    Ok(cleared(&state))
}

/// POST /v3/tokens/:id/logout: disable a token by id
pub async fn logout_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Response, AuthError> {
    state.manager.logout(&id, &ctx.caller()).await?;
    if ctx.is_current(&id) {
        return Ok(cleared(&state));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// DELETE /v3/tokens/:id: delete a token permanently
pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Response, AuthError> {
    state.manager.remove(&id, &ctx.caller()).await?;
    if ctx.is_current(&id) {
        return Ok(cleared(&state));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Attach the session cookie. Returns false (and logs) when the credential
/// cannot be carried in a header; the token is still in the body.
fn set_session_cookie(
    resp: &mut Response,
    credential: &Credential,
    max_age: Option<i64>,
    secure: bool,
) -> bool {
    match credentials::session_cookie(credential, max_age, secure) {
        Some(cookie) => {
            resp.headers_mut().insert(SET_COOKIE, cookie);
            true
        }
        None => {
            tracing::warn!(
                token_id = %credential.token_id,
                "session cookie could not be encoded; token returned in body only"
            );
            false
        }
    }
}

fn cleared(state: &AppState) -> Response {
    let mut resp = StatusCode::NO_CONTENT.into_response();
    resp.headers_mut().insert(
        SET_COOKIE,
        credentials::cleared_cookie(state.config.cookie_secure),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::Secret;

    #[test]
    fn test_session_cookie_is_attached() {
        let mut resp = StatusCode::CREATED.into_response();
        let cred = Credential::new("token-abc", Secret::new("s3cret"));
        assert!(set_session_cookie(&mut resp, &cred, Some(60), false));
        let cookie = resp.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("R_SESS=token-abc:s3cret;"));
    }

    #[test]
    fn test_unencodable_cookie_is_skipped() {
        let mut resp = StatusCode::CREATED.into_response();
        let cred = Credential::new("token-abc", Secret::new("line\nbreak"));
        assert!(!set_session_cookie(&mut resp, &cred, Some(60), false));
        assert!(resp.headers().get(SET_COOKIE).is_none());
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
