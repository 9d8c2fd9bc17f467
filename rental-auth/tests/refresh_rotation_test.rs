mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{create_test_config, TestApp};
use rental_auth::{
    models::{SecurityEventType, Severity},
    services::{Clock, UserRepository},
};
use serde_json::json;

async fn refresh(app: &TestApp, token: &str) -> common::TestResponse {
    app.post("/auth/refresh-token", None, json!({ "refresh_token": token }))
        .await
}

fn refresh_token_of(res: &common::TestResponse) -> String {
    res.data()["refresh_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn rotation_hands_out_a_new_pair_each_time() {
    let app = TestApp::spawn();
    let (_, r1) = app.signed_in("renter@example.com").await;

    let first = refresh(&app, &r1).await;
    assert_eq!(first.status, StatusCode::OK);
    let r2 = refresh_token_of(&first);
    assert_ne!(r1, r2);

    let access = first.data()["access_token"].as_str().unwrap();
    assert_eq!(app.get("/auth/me", Some(access)).await.status, StatusCode::OK);

    let second = refresh(&app, &r2).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_ne!(refresh_token_of(&second), r2);
}

#[tokio::test]
async fn replaying_a_rotated_token_revokes_the_whole_session() {
    let app = TestApp::spawn();
    let (_, r1) = app.signed_in("renter@example.com").await;

    let rotated = refresh(&app, &r1).await;
    let r2 = refresh_token_of(&rotated);
    let access = rotated.data()["access_token"].as_str().unwrap().to_string();

    let replay = refresh(&app, &r1).await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay.body["success"], false);

    // The legitimate holder of R2 is signed out too.
    assert_eq!(refresh(&app, &r2).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.get("/auth/me", Some(&access)).await.status, StatusCode::UNAUTHORIZED);

    app.settle().await;
    let incidents = app
        .audit_repo
        .events_of(SecurityEventType::SuspiciousActivityDetected);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].severity, Severity::Critical);
    assert_eq!(incidents[0].details["reason"], "refresh_token_reuse");
}

#[tokio::test]
async fn reuse_only_burns_the_affected_session() {
    let app = TestApp::spawn();
    let (_, laptop_r1) = app.signed_in("renter@example.com").await;
    let phone = app.login("renter@example.com", common::STRONG_PASSWORD).await;
    let (phone_access, phone_refresh) = common::tokens(&phone);

    refresh(&app, &laptop_r1).await;
    assert_eq!(refresh(&app, &laptop_r1).await.status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.get("/auth/me", Some(&phone_access)).await.status, StatusCode::OK);
    assert_eq!(refresh(&app, &phone_refresh).await.status, StatusCode::OK);
}

#[tokio::test]
async fn grace_window_tolerates_a_quick_retry_of_the_previous_token() {
    let mut config = create_test_config();
    config.jwt.rotation_grace_seconds = 30;
    let app = TestApp::with_config(config);
    let (_, r1) = app.signed_in("renter@example.com").await;

    let first = refresh(&app, &r1).await;
    assert_eq!(first.status, StatusCode::OK);

    app.clock.advance(Duration::seconds(5));
    let retry = refresh(&app, &r1).await;
    assert_eq!(retry.status, StatusCode::OK);
    let r3 = refresh_token_of(&retry);

    // Whatever the retry produced is the live token for the session.
    assert_eq!(refresh(&app, &r3).await.status, StatusCode::OK);

    app.settle().await;
    assert!(app
        .audit_repo
        .events_of(SecurityEventType::SuspiciousActivityDetected)
        .is_empty());
}

#[tokio::test]
async fn grace_window_does_not_excuse_late_replays() {
    let mut config = create_test_config();
    config.jwt.rotation_grace_seconds = 30;
    let app = TestApp::with_config(config);
    let (_, r1) = app.signed_in("renter@example.com").await;

    let rotated = refresh(&app, &r1).await;
    let r2 = refresh_token_of(&rotated);

    app.clock.advance(Duration::seconds(31));
    assert_eq!(refresh(&app, &r1).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(refresh(&app, &r2).await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_and_logged_out_refresh_tokens_are_rejected() {
    let app = TestApp::spawn();
    let (access, refresh_token) = app.signed_in("renter@example.com").await;

    app.post("/auth/logout", Some(&access), json!({})).await;
    assert_eq!(refresh(&app, &refresh_token).await.status, StatusCode::UNAUTHORIZED);

    let (_, other) = app.signed_in("tenant@example.com").await;
    app.clock.advance(Duration::days(8));
    assert_eq!(refresh(&app, &other).await.status, StatusCode::UNAUTHORIZED);

    // A logout is not a reuse incident.
    app.settle().await;
    assert!(app
        .audit_repo
        .events_of(SecurityEventType::SuspiciousActivityDetected)
        .is_empty());
}

#[tokio::test]
async fn concurrent_refreshes_of_one_token_have_a_single_winner() {
    let app = TestApp::spawn();
    let (_, r1) = app.signed_in("renter@example.com").await;

    let (a, b) = tokio::join!(refresh(&app, &r1), refresh(&app, &r1));
    let statuses = [a.status, b.status];

    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "statuses: {:?}",
        statuses
    );
}

#[tokio::test]
async fn refreshing_for_a_deleted_user_ends_the_session() {
    let app = TestApp::spawn();
    let (access, r1) = app.signed_in("renter@example.com").await;
    let user = app
        .users
        .find_by_email("renter@example.com")
        .await
        .unwrap()
        .unwrap();
    app.users.soft_delete(user.user_id, app.clock.now()).await.unwrap();

    assert_eq!(refresh(&app, &r1).await.status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.get("/auth/me", Some(&access)).await.status, StatusCode::UNAUTHORIZED);
    assert!(app.state.sessions.list_sessions(user.user_id).await.unwrap().is_empty());
}
