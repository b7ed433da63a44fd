use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine as _;

use crate::state::AppState;

/// Requires `Authorization: Bearer <token>` or `Basic <base64(user:token)>`
/// (some clients, e.g. Terraform's HTTP backend, only speak Basic).
/// Returns 401 for missing, malformed, or incorrect credentials.
/// Applied to every route — there are no public endpoints.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let authorized = match header {
        Some(value) => check_bearer(value, &state.auth_token) || check_basic(value, &state.auth_token),
        None => false,
    };

    if authorized {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response()
    }
}

fn check_bearer(header: &str, expected: &str) -> bool {
    header.strip_prefix("Bearer ").map(|t| t == expected).unwrap_or(false)
}

fn check_basic(header: &str, expected: &str) -> bool {
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    decoded.split_once(':').map(|(_, password)| password == expected).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_matches_exact_token() {
        assert!(check_bearer("Bearer secret", "secret"));
        assert!(!check_bearer("Bearer wrong", "secret"));
        assert!(!check_bearer("secret", "secret"));
    }

    #[test]
    fn basic_matches_password_field_only() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("anyuser:secret");
        assert!(check_basic(&format!("Basic {encoded}"), "secret"));
        let wrong = base64::engine::general_purpose::STANDARD.encode("anyuser:wrong");
        assert!(!check_basic(&format!("Basic {wrong}"), "secret"));
    }
}
