//! Per-request authentication.
//!
//! extract credential → validate (bounded by the request's auth deadline) →
//! attach [`AuthContext`] for downstream handlers. No retries: a rejection is
//! final for this request.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::credentials::{self, Credential};
use crate::errors::{AuthError, Rejection};
use crate::models::token::{Caller, TokenKind};
use crate::AppState;

/// The authenticated identity behind a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal_id: String,
    pub auth_provider: String,
    pub token_id: String,
    pub kind: TokenKind,
    pub cluster_id: Option<String>,
    pub privileged: bool,
    /// The credential that authenticated this request, used as the parent for derivation.
    pub credential: Credential,
}

impl AuthContext {
    pub fn caller(&self) -> Caller {
        Caller::new(self.principal_id.clone(), self.privileged)
    }

    pub fn is_current(&self, token_id: &str) -> bool {
        self.token_id == token_id
    }
}

/// Middleware: rejects the request unless it carries a valid token.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let ctx = resolve(&state, req.headers()).await?;
    tracing::debug!(
        principal = %ctx.principal_id,
        token_id = %ctx.token_id,
        privileged = ctx.privileged,
        "request authenticated"
    );
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Resolve request headers to an [`AuthContext`].
pub async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
    let credential = match credentials::extract(headers) {
        Ok(Some(credential)) => credential,
        Ok(None) => return Err(AuthError::Unauthenticated(Rejection::MissingCredential)),
        Err(e) => {
            tracing::warn!(error = %e, "malformed credential rejected");
            return Err(e.into());
        }
    };

    let token = tokio::time::timeout(
        state.config.auth_timeout(),
        state.manager.validate(&credential),
    )
    .await
    .map_err(|_| {
        tracing::error!(token_id = %credential.token_id, "token validation timed out");
        AuthError::Timeout
    })??;

    Ok(AuthContext {
        privileged: state.config.is_privileged(&token.principal_id),
        principal_id: token.principal_id,
        auth_provider: token.auth_provider,
        token_id: token.id,
        kind: token.kind,
        cluster_id: token.cluster_id,
        credential,
    })
}
