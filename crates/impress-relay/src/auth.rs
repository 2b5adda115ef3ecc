//! Shared-token access control

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::RelayState;

/// Token middleware. Accepts `Authorization: Bearer <token>` or a `token`
/// query parameter, since browsers cannot set headers on WebSocket upgrades.
/// Everything is allowed when no token is configured.
pub async fn auth_middleware(
    State(state): State<Arc<RelayState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.server.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let header_token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    let query_token = request.uri().query().and_then(token_from_query);

    match header_token.map(str::to_string).or(query_token) {
        Some(token) if token_matches(&token, expected) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with bad token");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Extract and decode the `token` parameter from a query string
pub fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
}

/// Compare without bailing out at the first differing byte
fn token_matches(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
