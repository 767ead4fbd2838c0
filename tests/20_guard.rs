mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use proptest::prelude::*;
use serde_json::json;

use micro_kit::auth::{decide, Auth, Decision, Roles};
use micro_kit::{AppError, RequestContext};

/// The decision table written out as one boolean expression
fn model(authenticated: bool, role: &str, required: &[String]) -> bool {
    let has = |r: &str| required.iter().any(|x| x == r);
    if required.is_empty() {
        return true;
    }
    if required.len() == 1 && has("*") {
        return true;
    }
    if !authenticated {
        return has("anonymous");
    }
    role == "admin" || has("authenticated") || (!role.trim().is_empty() && has(role))
}

fn role_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        Just("anonymous".to_string()),
        Just("authenticated".to_string()),
        Just("admin".to_string()),
        Just("editor".to_string()),
        Just("viewer".to_string()),
        Just("guest".to_string()),
        Just(String::new()),
    ]
}

proptest! {
    #[test]
    fn guard_matches_the_decision_table(
        authenticated in any::<bool>(),
        role in role_strategy(),
        required in proptest::collection::vec(role_strategy(), 0..4),
    ) {
        let auth = Auth { id: "u1".into(), role: role.clone(), authenticated };
        let roles = Roles::of(required.clone());
        // Roles drops duplicates; the model sees the same set
        let deduped: Vec<String> = roles.iter().map(str::to_string).collect();

        let expected = model(authenticated, &role, &deduped);
        prop_assert_eq!(decide(&auth, &roles).is_allowed(), expected);
    }

    #[test]
    fn guard_is_pure(
        authenticated in any::<bool>(),
        role in role_strategy(),
        required in proptest::collection::vec(role_strategy(), 0..4),
    ) {
        let auth = Auth { id: "u1".into(), role, authenticated };
        let roles = Roles::of(required);
        prop_assert_eq!(decide(&auth, &roles), decide(&auth, &roles));
    }
}

#[test]
fn guests_pass_only_open_or_anonymous_routes() {
    let guest = Auth::guest();
    assert_eq!(decide(&guest, &Roles::none()), Decision::Allow);
    assert_eq!(decide(&guest, &Roles::of(["*"])), Decision::Allow);
    assert_eq!(decide(&guest, &Roles::of(["anonymous", "editor"])), Decision::Allow);
    assert_eq!(decide(&guest, &Roles::of(["authenticated"])), Decision::Deny);
}

#[tokio::test]
async fn denied_caller_never_reaches_the_handler() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let service = common::spawn(common::config(Some(common::SECRET)), move |router| {
        router.group("/admin", ["admin"]).get("/", move |_rc: RequestContext| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(json!({ "ok": true }))
            }
        });
    })?;

    let editor = common::token("u1", "editor");
    let res = common::get(&service, "/admin", Some(&editor)).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body, json!({ "message": "permission.denied" }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let admin = common::token("root", "admin");
    let res = common::get(&service, "/admin", Some(&admin)).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn nested_groups_union_their_roles() -> Result<()> {
    let service = common::spawn(common::config(Some(common::SECRET)), |router| {
        let mut api = router.group("/api", ["editor"]);
        api.group("/reports", ["viewer"])
            .get("/daily", |rc: RequestContext| async move {
                Ok::<_, AppError>(json!({ "for": rc.auth().id }))
            });
    })?;

    for role in ["editor", "viewer", "admin"] {
        let res = common::get(&service, "/api/reports/daily", Some(&common::token("u1", role))).await?;
        assert_eq!(res.status, StatusCode::OK, "{role}");
        assert_eq!(res.body, json!({ "for": "u1" }));
    }

    let res = common::get(&service, "/api/reports/daily", Some(&common::token("u1", "intern"))).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn anonymous_routes_admit_guests() -> Result<()> {
    let mut config = common::config(Some(common::SECRET));
    config.security.public_routes = vec!["/signup".into()];

    let service = common::spawn(config, |router| {
        router.route(
            axum::routing::MethodFilter::POST,
            "signup",
            ["anonymous"],
            |rc: RequestContext| async move { Ok::<_, AppError>(json!({ "id": rc.auth().id })) },
        );
    })?;

    let res = common::post(&service, "/signup/", None, json!({})).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({ "id": "guest" }));
    Ok(())
}
