// Handler error taxonomy
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{json, Value};

use crate::database::DbError;

/// Business-rule violation caused by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("functional error {code}: {message}")]
pub struct FunctionalError {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Caller is known but lacks the rights for this operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("forbidden: {message}")]
pub struct ForbiddenError {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Missing or invalid credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("unauthorized {code}: {message}")]
pub struct UnauthorizedError {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// A referenced business entity does not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("resource not found: {message}")]
pub struct ResourceNotFoundError {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Unexpected internal failure that business code chose to classify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("technical error {code}: {message}")]
pub struct TechnicalError {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Transport-level error that carries its own status and wire body.
/// Produced by the input binder and the authorization guard.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("http error {status}")]
pub struct HttpError {
    pub status: StatusCode,
    pub body: Value,
}

/// Everything a handler can fail with
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Functional(#[from] FunctionalError),

    #[error(transparent)]
    Forbidden(#[from] ForbiddenError),

    #[error(transparent)]
    Unauthorized(#[from] UnauthorizedError),

    #[error(transparent)]
    ResourceNotFound(#[from] ResourceNotFoundError),

    #[error(transparent)]
    Technical(#[from] TechnicalError),

    #[error(transparent)]
    Http(#[from] HttpError),

    /// Storage backend found no matching record
    #[error("record not found")]
    RecordNotFound,

    /// Unclassified failure, reported as technical
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn functional(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Functional(FunctionalError {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(ForbiddenError {
            message: message.into(),
        })
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Unauthorized(UnauthorizedError {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::ResourceNotFound(ResourceNotFoundError {
            message: message.into(),
        })
    }

    pub fn technical(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Technical(TechnicalError {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn http(status: StatusCode, body: Value) -> Self {
        AppError::Http(HttpError { status, body })
    }

    /// Outcome of a guard denial. Distinct from [`ForbiddenError`], which
    /// business code returns and which maps to 400.
    pub fn permission_denied() -> Self {
        Self::http(StatusCode::FORBIDDEN, json!({ "message": "permission.denied" }))
    }

    pub fn is_record_not_found(&self) -> bool {
        matches!(self, AppError::RecordNotFound)
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => AppError::RecordNotFound,
            other => AppError::Other(other.into()),
        }
    }
}

// Automatic HTTP response conversion for Axum
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        crate::middleware::response::normalize_error(self).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functional_error_omits_empty_fields() {
        let err = FunctionalError {
            code: String::new(),
            message: "bad".into(),
        };
        assert_eq!(serde_json::to_value(&err).unwrap(), json!({ "message": "bad" }));
    }

    #[test]
    fn db_not_found_becomes_sentinel() {
        let err: AppError = DbError::NotFound.into();
        assert!(err.is_record_not_found());

        let err: AppError = DbError::Backend("boom".into()).into();
        assert!(matches!(err, AppError::Other(_)));
    }
}
