mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use micro_kit::validation::{Validate, Validator};
use micro_kit::router::handle_with;
use micro_kit::{AppError, RequestContext};

#[derive(Debug, Serialize, Deserialize)]
struct Signup {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    plan: String,
}

impl Validate for Signup {
    fn validate(&self, v: &mut Validator) {
        v.required("Name", &self.name);
        v.required("Email", &self.email).email("Email", &self.email);
        v.one_of("Plan", &self.plan, &["free", "pro"]);
    }
}

fn service(calls: Arc<AtomicUsize>) -> Result<micro_kit::router::AppService> {
    common::spawn(common::config(None), move |router| {
        router.post("/signup", move |rc: RequestContext| {
            let calls = Arc::clone(&calls);
            async move {
                let input: Signup = rc.should_bind()?;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(input)
            }
        });
        router.get("/search", |rc: RequestContext| async move {
            let input: Signup = rc.should_bind()?;
            Ok::<_, AppError>(json!({ "name": input.name }))
        });
    })
}

#[tokio::test]
async fn valid_body_reaches_the_handler() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service(Arc::clone(&calls))?;

    let body = json!({ "name": "ada", "email": "ada@example.com", "plan": "pro" });
    let res = common::post(&service, "/signup", None, body.clone()).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn broken_rules_answer_400_with_every_field() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service(Arc::clone(&calls))?;

    let res = common::post(&service, "/signup", None, json!({ "email": "nope", "plan": "gold" })).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.body,
        json!({
            "kind": "validation",
            "message": "validation.failed",
            "errors": ["Name: required", "Email: email", "Plan: oneof"],
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn undecodable_body_is_a_binding_failure() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service(Arc::clone(&calls))?;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/signup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"name\": "))?;
    let res = common::send(&service, request).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["kind"], "input.binding");
    assert_eq!(res.body["message"], "input.binding.failed");
    assert!(res.body["error"].is_string());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn empty_body_binds_from_the_query_string() -> Result<()> {
    let service = service(Arc::new(AtomicUsize::new(0)))?;

    let res = common::get(&service, "/search?name=ada&email=ada%40example.com&plan=free", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({ "name": "ada" }));

    let res = common::get(&service, "/search", None).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["kind"], "validation");
    Ok(())
}

#[tokio::test]
async fn oversized_body_is_rejected() -> Result<()> {
    let mut config = common::config(None);
    config.server.max_request_size_bytes = 32;
    let service = common::spawn(config, |router| {
        router.post("/echo", |rc: RequestContext| async move {
            let value: serde_json::Value = rc.should_bind()?;
            Ok::<_, AppError>(value)
        });
    })?;

    let big = json!({ "text": "x".repeat(256) });
    let res = common::post(&service, "/echo", None, big).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["kind"], "input.binding");
    Ok(())
}

#[tokio::test]
async fn guard_runs_before_the_body_is_read() -> Result<()> {
    let mut config = common::config(Some(common::SECRET));
    config.server.max_request_size_bytes = 16;
    let reached = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&reached);
    let service = common::spawn(config, move |router| {
        router.group("/admin", ["admin"]).post("/purge", move |rc: RequestContext| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let value: serde_json::Value = rc.should_bind()?;
                Ok::<_, AppError>(value)
            }
        });
    })?;

    let editor = common::token("u1", "editor");
    let big = json!({ "text": "x".repeat(40) });
    let res = common::post(&service, "/admin/purge", Some(&editor), big.clone()).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["message"], "permission.denied");

    let admin = common::token("root", "admin");
    let res = common::post(&service, "/admin/purge", Some(&admin), big).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["kind"], "input.binding");
    assert_eq!(reached.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn typed_handler_checks_roles_then_binds() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&calls);
    let service = common::spawn(common::config(Some(common::SECRET)), move |router| {
        router.post(
            "/plans",
            handle_with(["admin"], move |input: Signup, rc: RequestContext| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AppError>(json!({ "plan": input.plan, "by": rc.auth().id }))
                }
            }),
        );
    })?;

    let editor = common::token("u1", "editor");
    let invalid = json!({ "plan": "gold" });
    let res = common::post(&service, "/plans", Some(&editor), invalid.clone()).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let admin = common::token("root", "admin");
    let res = common::post(&service, "/plans", Some(&admin), invalid).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["kind"], "validation");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let body = json!({ "name": "ada", "email": "ada@example.com", "plan": "free" });
    let res = common::post(&service, "/plans", Some(&admin), body).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({ "plan": "free", "by": "root" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}
