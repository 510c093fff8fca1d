use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::sync::Arc;

use netsqlite_types::{Code, AUTHORIZATION_HEADER, DATABASE_HEADER};

use crate::api::ApiError;
use crate::auth::redact;
use crate::AppState;

/// Credentials that passed the auth middleware, stored in request extensions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    /// Database named by the `x-database-name` header.
    pub database: String,
}

/// Middleware authenticating every RPC call, unary and streaming alike.
///
/// Requires `authorization: Bearer <token>` with a token on the allow-list
/// and a non-empty `x-database-name` header. Handlers still take the target
/// database from the request body; the header only gates access.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| ApiError::new(Code::Internal, "application state missing"))?
        .clone();

    let auth_value = req
        .headers()
        .get(AUTHORIZATION_HEADER)
        .ok_or_else(|| ApiError::new(Code::Unauthenticated, "missing authorization header"))?
        .to_str()
        .map_err(|_| ApiError::new(Code::Unauthenticated, "invalid authorization header"))?
        .to_string();

    if !state.validator.validate_header(&auth_value) {
        tracing::warn!(
            path = %req.uri().path(),
            token = %redact(auth_value.trim_start_matches(netsqlite_types::BEARER_PREFIX)),
            "rejected call with invalid token"
        );
        return Err(ApiError::new(
            Code::Unauthenticated,
            "invalid authorization token",
        ));
    }

    let database = req
        .headers()
        .get(DATABASE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::new(Code::InvalidArgument, "database name is required"))?
        .to_string();

    tracing::debug!(path = %req.uri().path(), %database, "authenticated call");
    req.extensions_mut().insert(AuthContext { database });

    Ok(next.run(req).await)
}
