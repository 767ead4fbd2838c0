use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::auth::{decide, Auth, Roles};
use crate::env::{Ctx, Env};
use crate::error::{AppError, HttpError};
use crate::validation::{validate, FieldViolation, Validate};

/// Why [`RequestContext::bind`] could not produce a value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    /// Payload could not be decoded into the target shape
    #[error("input binding failed: {0}")]
    Binding(String),

    /// Payload decoded but broke declared rules
    #[error("validation failed: {}", render(.0).join(", "))]
    Validation(Vec<FieldViolation>),
}

impl BindError {
    pub fn into_http(self) -> HttpError {
        let body = match self {
            BindError::Binding(detail) => json!({
                "kind": "input.binding",
                "message": "input.binding.failed",
                "error": detail,
            }),
            BindError::Validation(violations) => json!({
                "kind": "validation",
                "message": "validation.failed",
                "errors": render(&violations),
            }),
        };
        HttpError {
            status: StatusCode::BAD_REQUEST,
            body,
        }
    }
}

impl From<BindError> for AppError {
    fn from(err: BindError) -> Self {
        AppError::Http(err.into_http())
    }
}

fn render(violations: &[FieldViolation]) -> Vec<String> {
    violations.iter().map(ToString::to_string).collect()
}

/// Everything one handler invocation can see about its request
#[derive(Debug, Clone)]
pub struct RequestContext {
    env: Arc<Env>,
    auth: Auth,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    params: HashMap<String, String>,
    body: Bytes,
}

impl RequestContext {
    pub fn new(env: Arc<Env>, auth: Auth, method: Method, uri: Uri) -> Self {
        Self {
            env,
            auth,
            method,
            uri,
            headers: HeaderMap::new(),
            params: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Environment plus caller, for repositories and services
    pub fn ctx(&self) -> Ctx {
        Ctx::new(Arc::clone(&self.env), self.auth.clone())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Decodes the query string alone, without validation
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, BindError> {
        Query::<T>::try_from_uri(&self.uri)
            .map(|Query(value)| value)
            .map_err(|e| BindError::Binding(e.body_text()))
    }

    /// Decodes the JSON body (the query string when the body is empty), then
    /// runs the target's declared rules.
    pub fn bind<T>(&self) -> Result<T, BindError>
    where
        T: DeserializeOwned + Validate,
    {
        let value: T = if self.body.iter().all(u8::is_ascii_whitespace) {
            self.bind_query()?
        } else {
            serde_json::from_slice(&self.body).map_err(|e| BindError::Binding(e.to_string()))?
        };
        validate(&value).map_err(BindError::Validation)?;
        Ok(value)
    }

    /// [`bind`](Self::bind) for use with `?`: a failure ends the handler with
    /// the binder's 400 response.
    pub fn should_bind<T>(&self) -> Result<T, AppError>
    where
        T: DeserializeOwned + Validate,
    {
        self.bind().map_err(AppError::from)
    }

    /// Runs the guard from inside a handler; a denial ends it with 403
    pub fn check_permission(&self, roles: impl Into<Roles>) -> Result<(), AppError> {
        let required = roles.into();
        if decide(&self.auth, &required).is_allowed() {
            return Ok(());
        }
        warn!(
            "permission denied for {} ({}) on {} {}, requires {}",
            self.auth.id,
            self.auth.role,
            self.method,
            self.uri.path(),
            required
        );
        Err(AppError::permission_denied())
    }

    fn bind_query<T: DeserializeOwned>(&self) -> Result<T, BindError> {
        if self.uri.query().map_or(true, str::is_empty) {
            // Nothing to read: decode an empty object so defaulted shapes still bind
            return serde_json::from_value(Value::Object(Default::default()))
                .map_err(|e| BindError::Binding(e.to_string()));
        }
        self.query()
    }
}
