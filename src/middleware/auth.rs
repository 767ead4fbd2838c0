use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::debug;

use crate::auth::{verify_token, Auth};
use crate::router::path::normalize_uri;

/// Bearer verification settings shared by every request
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    secret: Option<String>,
    public_routes: Vec<String>,
}

impl AuthSettings {
    pub fn new(secret: Option<String>, public_routes: &[String]) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            public_routes: public_routes.iter().map(|r| normalize_uri(r)).collect(),
        }
    }

    /// Everybody is a guest
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn add_public_route(&mut self, path: &str) {
        self.public_routes.push(normalize_uri(path));
    }

    /// Requests that skip bearer verification and run as the guest
    pub fn is_public(&self, method: &Method, path: &str) -> bool {
        let path = normalize_uri(path);
        if method == Method::OPTIONS {
            return true; // preflight
        }
        if path.ends_with(".ico") {
            return true;
        }
        if path.starts_with("/swagger/") || path.starts_with("/pub/") {
            return true;
        }
        if path.is_empty() || path == "/status" || path == "/auth" {
            return true;
        }
        self.public_routes
            .iter()
            .any(|r| r.eq_ignore_ascii_case(&path))
    }

    /// Caller identity, or the reason for a 401
    pub fn resolve(&self, method: &Method, path: &str, headers: &HeaderMap) -> Result<Auth, String> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(Auth::guest());
        };
        if self.is_public(method, path) {
            return Ok(Auth::guest());
        }
        let token = extract_bearer(headers)?;
        let claims = verify_token(secret, &token).map_err(|e| e.to_string())?;
        Ok(Auth::from(claims))
    }
}

/// Attaches the caller's [`Auth`] to the request, or answers 401
pub async fn authenticate(
    State(settings): State<Arc<AuthSettings>>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = settings.resolve(request.method(), request.uri().path(), request.headers());
    match resolved {
        Ok(auth) => {
            debug!("caller {} ({})", auth.id, auth.role);
            request.extensions_mut().insert(auth);
            next.run(request).await
        }
        Err(reason) => {
            debug!("rejected bearer on {}: {}", request.uri().path(), reason);
            (StatusCode::UNAUTHORIZED, Json(json!({ "message": reason }))).into_response()
        }
    }
}

/// Extract the bearer token from the Authorization header
fn extract_bearer(headers: &HeaderMap) -> Result<String, String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| "missing or malformed jwt".to_string())?
        .to_str()
        .map_err(|_| "missing or malformed jwt".to_string())?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err("missing or malformed jwt".to_string()),
    }
}
