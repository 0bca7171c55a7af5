//! HTTP handlers: the generic data API and schema administration.

pub mod admin;
pub mod api;

use crate::auth::Login;
use crate::error::AppError;
use crate::extractors::Origin;
use crate::state::AppState;
use axum::http::{header, HeaderMap};

/// Throttle check plus bearer token authentication. Failed authentications count against the origin.
pub(crate) fn authenticate(state: &AppState, origin: &Origin, headers: &HeaderMap) -> Result<Login, AppError> {
    state.bruteforce.check(&origin.0)?;
    let result = bearer_token(headers)
        .ok_or(AppError::Unauthorized)
        .and_then(|token| state.auth.authenticate(token));
    if result.is_err() {
        state.bruteforce.bad_attempt(&origin.0);
    }
    result
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
