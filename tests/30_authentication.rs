mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;

use micro_kit::{AppError, RequestContext, Router};

fn whoami(router: &mut Router) {
    router.get("/me", |rc: RequestContext| async move {
        Ok::<_, AppError>(rc.auth().clone())
    });
}

#[tokio::test]
async fn verified_token_becomes_the_caller() -> Result<()> {
    let service = common::spawn(common::config(Some(common::SECRET)), whoami)?;

    let res = common::get(&service, "/me", Some(&common::token("u42", "editor"))).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.body,
        json!({ "id": "u42", "role": "editor", "authenticated": true })
    );
    Ok(())
}

#[tokio::test]
async fn protected_path_without_token_is_unauthorized() -> Result<()> {
    let service = common::spawn(common::config(Some(common::SECRET)), whoami)?;

    let res = common::get(&service, "/me", None).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert!(res.body["message"].is_string());
    Ok(())
}

#[tokio::test]
async fn token_signed_with_another_secret_is_unauthorized() -> Result<()> {
    let service = common::spawn(common::config(Some(common::SECRET)), whoami)?;
    let forged =
        micro_kit::auth::issue_token("other-secret", "u1", "admin", chrono::Duration::hours(1))?;

    let res = common::get(&service, "/me", Some(&forged)).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn without_a_secret_everyone_is_a_guest() -> Result<()> {
    let service = common::spawn(common::config(None), whoami)?;

    let res = common::get(&service, "/me", Some("whatever")).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.body,
        json!({ "id": "guest", "role": "guest", "authenticated": false })
    );
    Ok(())
}

#[tokio::test]
async fn configured_public_routes_run_as_guest() -> Result<()> {
    let mut config = common::config(Some(common::SECRET));
    config.security.public_routes = vec!["me/".into()];
    let service = common::spawn(config, whoami)?;

    let res = common::get(&service, "/me", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["authenticated"], json!(false));
    Ok(())
}

#[tokio::test]
async fn preflight_skips_authentication() -> Result<()> {
    let service = common::spawn(common::config(Some(common::SECRET)), whoami)?;

    let request = common::request(Method::OPTIONS, "/me", None, None);
    let res = common::send(&service, request).await?;
    assert_ne!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}
