//! Test helpers for rental-auth integration tests.
//!
//! Every test gets its own router wired to in-memory stores and a manual
//! clock, and drives it with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use rental_auth::{
    build_router,
    config::{
        AccountConfig, AuditConfig, AuthConfig, DatabaseConfig, Environment, JwtConfig, MfaConfig,
        NotificationServiceConfig, RateLimitConfig, RedisConfig, SecurityConfig, SessionConfig,
    },
    models::{Role, User},
    services::{
        Clock, InMemoryAuditRepository, InMemoryStore, InMemoryUserRepository, ManualClock,
        RecordingNotifier, UserRepository,
    },
    utils::{hash_password, Password},
    AppState,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use totp_rs::{Algorithm, Secret, TOTP};
use tower::ServiceExt;

pub const TEST_IP: &str = "198.51.100.10";
/// Load balancer every `send` goes through; listed in `trusted_proxies`.
pub const PROXY_IP: &str = "10.0.0.1";
pub const STRONG_PASSWORD: &str = "Str0ng!Passw0rd";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn create_test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "rental-auth".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://localhost".to_string(),
            operation_timeout_ms: 500,
        },
        jwt: JwtConfig {
            access_secret: SecretString::new("integration-access-secret-0123456789abcdef".into()),
            refresh_secret: SecretString::new("integration-refresh-secret-0123456789abcde".into()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            temporary_token_expiry_minutes: 5,
            rotation_grace_seconds: 0,
            refresh_token_retention_days: 30,
        },
        session: SessionConfig {
            max_sessions_per_user: 5,
        },
        rate_limit: RateLimitConfig {
            api_limit: 1000,
            api_window_seconds: 60,
            auth_attempts: 10,
            auth_window_seconds: 900,
            sensitive_attempts: 5,
            sensitive_window_seconds: 3600,
            mfa_attempts: 5,
            mfa_window_seconds: 900,
        },
        mfa: MfaConfig {
            issuer: "RentalMarketplace".to_string(),
            pending_secret_ttl_seconds: 600,
        },
        audit: AuditConfig {
            max_retries: 1,
            fallback_buffer_size: 32,
            anomaly_failed_login_threshold: 5,
            anomaly_window_seconds: 900,
        },
        account: AccountConfig {
            public_base_url: "http://localhost:3000".to_string(),
            verification_token_ttl_hours: 24,
            reset_token_ttl_minutes: 60,
            require_verified_email: false,
        },
        notification: NotificationServiceConfig {
            url: "http://localhost:3004".to_string(),
            enabled: false,
            timeout_seconds: 1,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            trusted_proxies: vec![PROXY_IP.parse().unwrap()],
        },
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn message(&self) -> &str {
        self.body["message"].as_str().unwrap_or_default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: ManualClock,
    pub users: Arc<InMemoryUserRepository>,
    pub store: Arc<InMemoryStore>,
    pub audit_repo: Arc<InMemoryAuditRepository>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let clock = ManualClock::new(start_time());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let users = Arc::new(InMemoryUserRepository::default());
        let store = Arc::new(InMemoryStore::new(shared_clock.clone()));
        let audit_repo = Arc::new(InMemoryAuditRepository::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState::new(
            config,
            users.clone(),
            audit_repo.clone(),
            store.clone(),
            notifier.clone(),
            shared_clock,
        );
        let router = build_router(state.clone());

        Self {
            router,
            state,
            clock,
            users,
            store,
            audit_repo,
            notifier,
        }
    }

    /// Let background audit writes and notifications land.
    pub async fn settle(&self) {
        self.state.flush().await;
    }

    /// Send as client `ip`, relayed by the trusted proxy.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
        ip: &str,
    ) -> TestResponse {
        self.send_via(PROXY_IP, method, uri, bearer, body, Some(ip))
            .await
    }

    /// Send from socket peer `peer`, optionally claiming `forwarded_for`.
    pub async fn send_via(
        &self,
        peer: &str,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
        forwarded_for: Option<&str>,
    ) -> TestResponse {
        let peer: IpAddr = peer.parse().unwrap();
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(SocketAddr::new(peer, 40000)))
            .header(header::USER_AGENT, "integration-test");
        if let Some(forwarded_for) = forwarded_for {
            builder = builder.header("x-forwarded-for", forwarded_for);
        }
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> TestResponse {
        self.send(Method::GET, uri, bearer, None, TEST_IP).await
    }

    pub async fn post(&self, uri: &str, bearer: Option<&str>, body: Value) -> TestResponse {
        self.send(Method::POST, uri, bearer, Some(body), TEST_IP).await
    }

    pub async fn delete(&self, uri: &str, bearer: Option<&str>, body: Option<Value>) -> TestResponse {
        self.send(Method::DELETE, uri, bearer, body, TEST_IP).await
    }

    pub async fn register(&self, email: &str) -> TestResponse {
        self.post(
            "/auth/register",
            None,
            json!({ "email": email, "password": STRONG_PASSWORD }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.post(
            "/auth/login",
            None,
            json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Register and log in; returns `(access_token, refresh_token)`.
    pub async fn signed_in(&self, email: &str) -> (String, String) {
        let res = self.register(email).await;
        assert_eq!(res.status, StatusCode::CREATED, "register failed: {}", res.body);
        let res = self.login(email, STRONG_PASSWORD).await;
        assert_eq!(res.status, StatusCode::OK, "login failed: {}", res.body);
        tokens(&res)
    }

    /// Insert a user directly, bypassing the self-registration role rules.
    pub async fn seed_user(&self, email: &str, role: Role) -> User {
        let hash = hash_password(&Password::new(STRONG_PASSWORD)).unwrap();
        let user = User::new(email, hash.into_string(), role, None, self.clock.now());
        self.users.create(&user).await.unwrap();
        user
    }
}

pub fn tokens(res: &TestResponse) -> (String, String) {
    let tokens = &res.data()["tokens"];
    (
        tokens["access_token"].as_str().unwrap().to_string(),
        tokens["refresh_token"].as_str().unwrap().to_string(),
    )
}

/// Current code for a base32 secret, as an authenticator app would show it.
pub fn totp_code(secret: &str, at: DateTime<Utc>) -> String {
    let bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "test".to_string())
        .unwrap()
        .generate(at.timestamp() as u64)
}
