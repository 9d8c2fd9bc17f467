mod common;

use axum::http::StatusCode;
use common::{create_test_config, tokens, TestApp, STRONG_PASSWORD};
use rental_auth::{models::SecurityEventType, services::UserRepository};
use serde_json::json;

#[tokio::test]
async fn register_returns_created_user_without_secrets() {
    let app = TestApp::spawn();

    let res = app.register("Renter@Example.com").await;

    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.body["success"], true);
    let user = &res.data()["user"];
    assert_eq!(user["email"], "renter@example.com");
    assert_eq!(user["role"], "client");
    assert_eq!(user["email_verified"], false);
    assert!(user.get("password_hash").is_none());
    assert!(user.get("mfa_secret").is_none());
    assert!(!res.body.to_string().contains(STRONG_PASSWORD));
}

#[tokio::test]
async fn register_rejects_duplicates_weak_passwords_and_privileged_roles() {
    let app = TestApp::spawn();
    assert_eq!(app.register("host@example.com").await.status, StatusCode::CREATED);

    let duplicate = app.register("HOST@example.com").await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let weak = app
        .post(
            "/auth/register",
            None,
            json!({ "email": "weak@example.com", "password": "alllowercase" }),
        )
        .await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);
    assert!(weak.body["errors"].as_array().is_some_and(|e| !e.is_empty()));

    let admin = app
        .post(
            "/auth/register",
            None,
            json!({ "email": "sneaky@example.com", "password": STRONG_PASSWORD, "role": "admin" }),
        )
        .await;
    assert_eq!(admin.status, StatusCode::FORBIDDEN);

    let agent = app
        .post(
            "/auth/register",
            None,
            json!({ "email": "agent@example.com", "password": STRONG_PASSWORD, "role": "agent" }),
        )
        .await;
    assert_eq!(agent.status, StatusCode::CREATED);
    assert_eq!(agent.data()["user"]["role"], "agent");
}

#[tokio::test]
async fn login_issues_a_pair_with_access_shorter_than_refresh() {
    let app = TestApp::spawn();
    app.register("renter@example.com").await;

    let res = app.login("renter@example.com", STRONG_PASSWORD).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.data()["require_two_factor"], false);
    let pair = &res.data()["tokens"];
    assert_eq!(pair["token_type"], "Bearer");
    let access_ttl = pair["expires_in"].as_i64().unwrap();
    let refresh_ttl = pair["refresh_expires_in"].as_i64().unwrap();
    assert!(access_ttl > 0);
    assert!(access_ttl <= refresh_ttl);
    assert!(res.data()["session_id"].is_string());

    let (access, _) = tokens(&res);
    let me = app.get("/auth/me", Some(&access)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.data()["email"], "renter@example.com");
}

#[tokio::test]
async fn bad_credentials_get_the_same_generic_answer() {
    let app = TestApp::spawn();
    app.register("renter@example.com").await;

    let wrong_password = app.login("renter@example.com", "Wr0ng!Password").await;
    let unknown_email = app.login("nobody@example.com", STRONG_PASSWORD).await;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body, unknown_email.body);

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::FailedLogin).len(), 2);
}

#[tokio::test]
async fn logout_removes_the_session() {
    let app = TestApp::spawn();
    let (first_access, _) = app.signed_in("renter@example.com").await;
    let second = app.login("renter@example.com", STRONG_PASSWORD).await;
    let (second_access, _) = tokens(&second);
    let second_session = second.data()["session_id"].as_str().unwrap().to_string();

    let listed = app.get("/auth/sessions", Some(&first_access)).await;
    assert_eq!(listed.data()["sessions"].as_array().unwrap().len(), 2);

    let res = app.post("/auth/logout", Some(&second_access), json!({})).await;
    assert_eq!(res.status, StatusCode::OK);

    let listed = app.get("/auth/sessions", Some(&first_access)).await;
    let sessions = listed.data()["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions.iter().all(|s| s["session_id"] != second_session.as_str()));
    assert_eq!(sessions[0]["is_current"], true);

    // The access token outlives its session only on paper.
    let me = app.get("/auth/me", Some(&second_access)).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::UserLogout).len(), 1);
}

#[tokio::test]
async fn protected_routes_require_a_valid_bearer_token() {
    let app = TestApp::spawn();

    assert_eq!(app.get("/auth/me", None).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.get("/auth/me", Some("not-a-jwt")).await.status,
        StatusCode::UNAUTHORIZED
    );

    let (_, refresh) = app.signed_in("renter@example.com").await;
    let with_refresh = app.get("/auth/me", Some(&refresh)).await;
    assert_eq!(with_refresh.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn forgot_password_does_not_reveal_registered_emails() {
    let app = TestApp::spawn();
    app.register("renter@example.com").await;

    let known = app
        .post("/auth/forgot-password", None, json!({ "email": "renter@example.com" }))
        .await;
    let unknown = app
        .post("/auth/forgot-password", None, json!({ "email": "ghost@example.com" }))
        .await;

    assert_eq!(known.status, StatusCode::OK);
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(known.body, unknown.body);

    app.settle().await;
    assert!(app.notifier.last_reset_token("renter@example.com").is_some());
    assert!(app.notifier.last_reset_token("ghost@example.com").is_none());
}

#[tokio::test]
async fn reset_password_is_single_use_and_signs_out_everywhere() {
    let app = TestApp::spawn();
    let (access, refresh) = app.signed_in("renter@example.com").await;

    app.post("/auth/forgot-password", None, json!({ "email": "renter@example.com" }))
        .await;
    app.settle().await;
    let token = app.notifier.last_reset_token("renter@example.com").unwrap();

    let new_password = "Brand!New1Pass";
    let res = app
        .post(
            &format!("/auth/reset-password/{}", token),
            None,
            json!({ "password": new_password }),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let again = app
        .post(
            &format!("/auth/reset-password/{}", token),
            None,
            json!({ "password": "Another!1Pass" }),
        )
        .await;
    assert_eq!(again.status, StatusCode::BAD_REQUEST);

    assert_eq!(app.get("/auth/me", Some(&access)).await.status, StatusCode::UNAUTHORIZED);
    let refreshed = app
        .post("/auth/refresh-token", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(refreshed.status, StatusCode::UNAUTHORIZED);

    assert_eq!(
        app.login("renter@example.com", STRONG_PASSWORD).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.login("renter@example.com", new_password).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn change_password_keeps_only_the_current_session() {
    let app = TestApp::spawn();
    let (current, _) = app.signed_in("renter@example.com").await;
    let other = app.login("renter@example.com", STRONG_PASSWORD).await;
    let (other_access, _) = tokens(&other);

    let wrong = app
        .post(
            "/auth/change-password",
            Some(&current),
            json!({ "current_password": "Wr0ng!Password", "new_password": "Brand!New1Pass" }),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let res = app
        .post(
            "/auth/change-password",
            Some(&current),
            json!({ "current_password": STRONG_PASSWORD, "new_password": "Brand!New1Pass" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);

    assert_eq!(app.get("/auth/me", Some(&current)).await.status, StatusCode::OK);
    assert_eq!(
        app.get("/auth/me", Some(&other_access)).await.status,
        StatusCode::UNAUTHORIZED
    );

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::PasswordChanged).len(), 1);
}

#[tokio::test]
async fn verify_email_link_works_once() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("renter@example.com").await;
    app.settle().await;
    let token = app.notifier.last_verification_token("renter@example.com").unwrap();

    let res = app.get(&format!("/auth/verify-email/{}", token), None).await;
    assert_eq!(res.status, StatusCode::OK);
    let again = app.get(&format!("/auth/verify-email/{}", token), None).await;
    assert_eq!(again.status, StatusCode::BAD_REQUEST);

    let me = app.get("/auth/me", Some(&access)).await;
    assert_eq!(me.data()["email_verified"], true);
}

#[tokio::test]
async fn unverified_email_login_is_refused_and_audited() {
    let mut config = create_test_config();
    config.account.require_verified_email = true;
    let app = TestApp::with_config(config);
    app.register("renter@example.com").await;

    let res = app.login("Renter@Example.com", STRONG_PASSWORD).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.message(), "Email address not verified");

    app.settle().await;
    let failures = app.audit_repo.events_of(SecurityEventType::FailedLogin);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].details["reason"], "email_not_verified");
    assert_eq!(failures[0].details["email"], "renter@example.com");
    assert!(failures[0].user_id.is_some());
}

#[tokio::test]
async fn login_that_fails_mid_way_leaves_no_session_behind() {
    let app = TestApp::spawn();
    app.register("renter@example.com").await;
    let user = app
        .users
        .find_by_email("renter@example.com")
        .await
        .unwrap()
        .unwrap();

    app.store.fail_next_swaps(1);
    let res = app.login("renter@example.com", STRONG_PASSWORD).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.state.sessions.list_sessions(user.user_id).await.unwrap().is_empty());

    let res = app.login("renter@example.com", STRONG_PASSWORD).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(app.state.sessions.list_sessions(user.user_id).await.unwrap().len(), 1);

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::SuccessfulLogin).len(), 1);
}

#[tokio::test]
async fn delete_account_soft_deletes_and_revokes_sessions() {
    let app = TestApp::spawn();
    let (access, _) = app.signed_in("renter@example.com").await;

    let res = app
        .delete("/auth/account", Some(&access), Some(json!({ "password": STRONG_PASSWORD })))
        .await;
    assert_eq!(res.status, StatusCode::OK);

    assert_eq!(app.get("/auth/me", Some(&access)).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.login("renter@example.com", STRONG_PASSWORD).await.status,
        StatusCode::UNAUTHORIZED
    );

    app.settle().await;
    assert_eq!(app.audit_repo.events_of(SecurityEventType::AccountDeleted).len(), 1);
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let app = TestApp::spawn();

    let health = app.get("/health", None).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["status"], "healthy");

    let doc = app.get("/.well-known/openapi.json", None).await;
    assert_eq!(doc.status, StatusCode::OK);
    assert!(doc.body["paths"]["/auth/refresh-token"].is_object());
}
