mod common;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use common::{tokens, totp_code, TestApp, STRONG_PASSWORD, TEST_IP};
use rental_auth::{
    models::SecurityEventType,
    services::{Clock, SentNotification},
};
use serde_json::json;

/// Enrol `access`'s user and return the shared secret.
async fn enable_two_factor(app: &TestApp, access: &str) -> String {
    let setup = app.post("/auth/2fa/setup", Some(access), json!({})).await;
    assert_eq!(setup.status, StatusCode::OK, "setup failed: {}", setup.body);
    let secret = setup.data()["secret"].as_str().unwrap().to_string();
    assert!(setup.data()["provisioning_uri"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));

    let code = totp_code(&secret, app.clock.now());
    let confirm = app
        .post("/auth/2fa/verify", Some(access), json!({ "code": code }))
        .await;
    assert_eq!(confirm.status, StatusCode::OK, "confirm failed: {}", confirm.body);
    assert_eq!(confirm.data()["two_factor_enabled"], true);

    // Codes are single use per time step; move on to a fresh one.
    app.clock.advance(Duration::seconds(31));
    secret
}

async fn temporary_token(app: &TestApp, email: &str) -> String {
    let res = app.login(email, STRONG_PASSWORD).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.data()["require_two_factor"], true);
    assert!(res.data().get("tokens").is_none());
    res.data()["temporary_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn enrolment_then_login_requires_a_second_factor() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    let secret = enable_two_factor(&app, &access).await;

    let me = app.get("/auth/me", Some(&access)).await;
    assert_eq!(me.data()["mfa_enabled"], true);
    assert!(me.data().get("mfa_secret").is_none());

    let temporary = temporary_token(&app, "host@example.com").await;

    let code = totp_code(&secret, app.clock.now());
    let res = app
        .post("/auth/2fa/verify", Some(&temporary), json!({ "code": code }))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.data()["session_id"].is_string());
    let (full_access, _) = tokens(&res);

    let listed = app.get("/auth/sessions", Some(&full_access)).await;
    let current = listed.data()["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["is_current"] == true)
        .cloned()
        .unwrap();
    assert_eq!(current["two_factor_authenticated"], true);

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::TwoFactorEnabled).len(), 1);
    assert_eq!(app.audit_repo.events_of(SecurityEventType::Successful2fa).len(), 1);
}

#[tokio::test]
async fn temporary_token_is_not_a_session_token() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    enable_two_factor(&app, &access).await;
    let temporary = temporary_token(&app, "host@example.com").await;

    assert_eq!(app.get("/auth/me", Some(&temporary)).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.post("/auth/refresh-token", None, json!({ "refresh_token": temporary }))
            .await
            .status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn wrong_code_is_rejected_and_audited() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    enable_two_factor(&app, &access).await;
    let temporary = temporary_token(&app, "host@example.com").await;

    let res = app
        .post("/auth/2fa/verify", Some(&temporary), json!({ "code": "000000" }))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let malformed = app
        .post("/auth/2fa/verify", Some(&temporary), json!({ "code": "12ab56" }))
        .await;
    assert_eq!(malformed.status, StatusCode::UNAUTHORIZED);

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::Failed2fa).len(), 2);
}

#[tokio::test]
async fn a_code_and_a_temporary_token_work_only_once() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    let secret = enable_two_factor(&app, &access).await;
    let temporary = temporary_token(&app, "host@example.com").await;

    let code = totp_code(&secret, app.clock.now());
    let first = app
        .post("/auth/2fa/verify", Some(&temporary), json!({ "code": code }))
        .await;
    assert_eq!(first.status, StatusCode::OK);

    // Same code, fresh challenge: the code is spent.
    let second_temporary = temporary_token(&app, "host@example.com").await;
    let replayed_code = app
        .post("/auth/2fa/verify", Some(&second_temporary), json!({ "code": code }))
        .await;
    assert_eq!(replayed_code.status, StatusCode::UNAUTHORIZED);

    // Fresh code, spent challenge: the temporary token is spent.
    app.clock.advance(Duration::seconds(31));
    let fresh = totp_code(&secret, app.clock.now());
    let replayed_token = app
        .post("/auth/2fa/verify", Some(&temporary), json!({ "code": fresh }))
        .await;
    assert_eq!(replayed_token.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn temporary_token_expires() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    let secret = enable_two_factor(&app, &access).await;
    let temporary = temporary_token(&app, "host@example.com").await;

    app.clock.advance(Duration::minutes(6));
    let code = totp_code(&secret, app.clock.now());
    let res = app
        .post("/auth/2fa/verify", Some(&temporary), json!({ "code": code }))
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_wrong_codes_hit_the_mfa_limit() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    let secret = enable_two_factor(&app, &access).await;
    let temporary = temporary_token(&app, "host@example.com").await;

    for attempt in 1..=5 {
        let res = app
            .post("/auth/2fa/verify", Some(&temporary), json!({ "code": "000000" }))
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED, "attempt {}", attempt);
    }

    let code = totp_code(&secret, app.clock.now());
    let blocked = app
        .post("/auth/2fa/verify", Some(&temporary), json!({ "code": code }))
        .await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(blocked.headers.contains_key("retry-after"));
}

#[tokio::test]
async fn disabling_requires_the_password_and_restores_plain_login() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    enable_two_factor(&app, &access).await;

    let wrong = app
        .send(
            Method::DELETE,
            "/auth/2fa",
            Some(&access),
            Some(json!({ "password": "Wr0ng!Password" })),
            TEST_IP,
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let res = app
        .delete("/auth/2fa", Some(&access), Some(json!({ "password": STRONG_PASSWORD })))
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let login = app.login("host@example.com", STRONG_PASSWORD).await;
    assert_eq!(login.data()["require_two_factor"], false);
    assert!(login.data()["tokens"]["access_token"].is_string());

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::TwoFactorDisabled).len(), 1);
    assert!(app.notifier.sent().iter().any(|n| matches!(
        n,
        SentNotification::Security { to, subject }
            if to == "host@example.com" && subject.contains("disabled")
    )));
}

#[tokio::test]
async fn setup_twice_after_enrolment_conflicts() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("host@example.com").await;
    enable_two_factor(&app, &access).await;

    let again = app.post("/auth/2fa/setup", Some(&access), json!({})).await;

    assert_eq!(again.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn sessions_older_than_enrolment_need_the_second_factor_for_account_changes() {
    let app = TestApp::spawn();
    let (enrolling, _) = app.signed_in("host@example.com").await;
    let (older, _) = tokens(&app.login("host@example.com", STRONG_PASSWORD).await);
    enable_two_factor(&app, &enrolling).await;

    let res = app
        .delete("/auth/2fa", Some(&older), Some(json!({ "password": STRONG_PASSWORD })))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.message(), "Two-factor authentication required");

    let res = app
        .delete("/auth/account", Some(&older), Some(json!({ "password": STRONG_PASSWORD })))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    // Plain reads still work on the older session.
    assert_eq!(app.get("/auth/me", Some(&older)).await.status, StatusCode::OK);

    let res = app
        .delete("/auth/2fa", Some(&enrolling), Some(json!({ "password": STRONG_PASSWORD })))
        .await;
    assert_eq!(res.status, StatusCode::OK);
}
