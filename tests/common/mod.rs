#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use micro_kit::auth::issue_token;
use micro_kit::config::{AppConfig, Profile};
use micro_kit::database::{DbPort, MemoryDb};
use micro_kit::router::AppService;
use micro_kit::{App, AppInfo, Router};

pub const SECRET: &str = "integration-secret";

/// Development preset without env overrides, logging or webhooks
pub fn config(secret: Option<&str>) -> AppConfig {
    let mut config = AppConfig::for_profile(Profile::Development);
    config.security.jwt_secret = secret.map(str::to_string);
    config.server.enable_request_logging = false;
    config
}

pub fn info() -> AppInfo {
    AppInfo::new("micro-kit-test", "1.2.3")
}

/// App over a fresh in-memory store; `routes` registers test handlers
pub fn spawn(config: AppConfig, routes: impl FnOnce(&mut Router)) -> Result<AppService> {
    spawn_with_db(config, Arc::new(MemoryDb::new()), routes)
}

pub fn spawn_with_db(
    config: AppConfig,
    db: Arc<dyn DbPort>,
    routes: impl FnOnce(&mut Router),
) -> Result<AppService> {
    let mut app = App::with_db(config, info(), db)?;
    routes(app.router());
    Ok(app.into_service())
}

pub fn token(sub: &str, role: &str) -> String {
    issue_token(SECRET, sub, role, chrono::Duration::hours(1)).unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub async fn send(service: &AppService, request: Request<Body>) -> Result<TestResponse> {
    let response = service.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(TestResponse {
        status,
        headers,
        body,
    })
}

pub fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn get(service: &AppService, uri: &str, bearer: Option<&str>) -> Result<TestResponse> {
    send(service, request(Method::GET, uri, bearer, None)).await
}

pub async fn post(
    service: &AppService,
    uri: &str,
    bearer: Option<&str>,
    body: Value,
) -> Result<TestResponse> {
    send(service, request(Method::POST, uri, bearer, Some(body))).await
}
