mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get_auth, post_json, post_json_auth, signup_token};
use serde_json::json;

#[tokio::test]
async fn test_partial_update_touches_only_supplied_fields() {
    let t = build_test_app();
    let token = signup_token(t.app(), "a@x.com", "1").await;

    let res = post_json_auth(
        t.app(),
        "/api/profile",
        &token,
        json!({ "name": "Ada", "vat": "GB123" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = post_json_auth(
        t.app(),
        "/api/profile",
        &token,
        json!({ "billing_address": "1 Loop Rd", "is_admin": true }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(get_auth(t.app(), "/api/profile", &token).await).await;
    let profile = &body["profile"]["profile"];
    assert_eq!(profile["name"], "Ada");
    assert_eq!(profile["vat"], "GB123");
    assert_eq!(profile["billing_address"], "1 Loop Rd");
    assert!(profile.get("is_admin").is_none());
}

#[tokio::test]
async fn test_profile_never_exposes_password_hash() {
    let t = build_test_app();
    let token = signup_token(t.app(), "a@x.com", "1").await;
    let body = body_json(get_auth(t.app(), "/api/profile", &token).await).await;

    let text = body.to_string();
    assert!(!text.contains("password"));
    assert!(!text.contains("$argon2"));
    assert_eq!(body["ok"], true);
    assert!(body["profile"]["subscription"].is_null());
}

#[tokio::test]
async fn test_password_change_through_profile() {
    let t = build_test_app();
    let token = signup_token(t.app(), "a@x.com", "1").await;

    let res = post_json_auth(
        t.app(),
        "/api/profile",
        &token,
        json!({ "password": "Changed123" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = post_json(
        t.app(),
        "/api/login",
        json!({ "email": "a@x.com", "password": "Changed123" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_short_password_rejects_whole_update() {
    let t = build_test_app();
    let token = signup_token(t.app(), "a@x.com", "1").await;

    let res = post_json_auth(
        t.app(),
        "/api/profile",
        &token,
        json!({ "name": "Mallory", "password": "short" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body = body_json(get_auth(t.app(), "/api/profile", &token).await).await;
    assert!(body["profile"]["profile"].get("name").is_none());
}
