//! Maps a handler's `(value, error)` outcome to a status and a JSON body.
//!
//! | outcome                         | status | body                                  |
//! |---------------------------------|--------|---------------------------------------|
//! | `Ok(value)`                     | 200    | `value`                               |
//! | `RecordNotFound`                | 404    | `{"message":"resource.not_found"}`    |
//! | `FunctionalError`               | 400    | `{code, message}`                     |
//! | `ForbiddenError`                | 400    | `{message}`                           |
//! | `UnauthorizedError`             | 401    | `{code, message}`                     |
//! | `ResourceNotFoundError`         | 404    | `{message}`                           |
//! | `TechnicalError`                | 500    | `{code, message}`                     |
//! | `HttpError`                     | own    | own                                   |
//! | anything else                   | 500    | `{error, kind:"technical", time}`     |

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::AppError;

/// Wire-ready outcome of one request
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub status: StatusCode,
    pub body: Value,
}

impl Normalized {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

impl IntoResponse for Normalized {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Total over every outcome; never fails
pub fn normalize<T: Serialize>(result: Result<T, AppError>) -> Normalized {
    match result {
        Ok(value) => match serde_json::to_value(&value) {
            Ok(body) => Normalized::new(StatusCode::OK, body),
            Err(e) => {
                error!("Failed to serialize response data: {}", e);
                technical(&e.to_string())
            }
        },
        Err(err) => normalize_error(err),
    }
}

pub fn normalize_error(err: AppError) -> Normalized {
    match err {
        AppError::RecordNotFound => {
            Normalized::new(StatusCode::NOT_FOUND, json!({ "message": "resource.not_found" }))
        }
        AppError::Functional(e) => Normalized::new(StatusCode::BAD_REQUEST, fields(&e)),
        // Kept at 400; guard denials answer 403 through `AppError::Http`
        AppError::Forbidden(e) => Normalized::new(StatusCode::BAD_REQUEST, fields(&e)),
        AppError::Unauthorized(e) => Normalized::new(StatusCode::UNAUTHORIZED, fields(&e)),
        AppError::ResourceNotFound(e) => Normalized::new(StatusCode::NOT_FOUND, fields(&e)),
        AppError::Technical(e) => {
            Normalized::new(StatusCode::INTERNAL_SERVER_ERROR, fields(&e))
        }
        AppError::Http(e) => Normalized::new(e.status, e.body),
        AppError::Other(e) => {
            error!("unhandled error: {:#}", e);
            technical(&e.to_string())
        }
    }
}

/// Catch-all body: top-level message plus timestamp, no error chain
pub fn technical(message: &str) -> Normalized {
    Normalized::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({
            "error": message,
            "kind": "technical",
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }),
    )
}

fn fields<E: Serialize>(err: &E) -> Value {
    serde_json::to_value(err).unwrap_or(Value::Null)
}
