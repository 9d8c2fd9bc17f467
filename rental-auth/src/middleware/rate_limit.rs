//! Route-level throttling driven by one declarative table.
//!
//! Every matched request counts against the `api` tier by IP. Routes listed
//! in [`ROUTE_POLICY_TABLE`] are also counted against their own tier; for the
//! tiers that ignore successes, a 2xx response hands the attempt back.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use service_core::error::AppError;

use super::auth::bearer_token;
use super::request_meta::client_ip;
use crate::models::SecurityEventType;
use crate::services::{LimitTier, RateDecision};
use crate::AppState;

/// Whose budget a route spends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitIdentity {
    Ip,
    /// The bearer token's user when present and valid, else the IP.
    UserOrIp,
}

#[derive(Debug, Clone, Copy)]
pub struct RoutePolicy {
    pub method: &'static str,
    pub path: &'static str,
    pub tier: LimitTier,
    pub identity: LimitIdentity,
}

pub const ROUTE_POLICY_TABLE: &[RoutePolicy] = &[
    RoutePolicy { method: "POST", path: "/auth/login", tier: LimitTier::Auth, identity: LimitIdentity::Ip },
    RoutePolicy { method: "POST", path: "/auth/register", tier: LimitTier::Auth, identity: LimitIdentity::Ip },
    RoutePolicy { method: "POST", path: "/auth/refresh-token", tier: LimitTier::Auth, identity: LimitIdentity::Ip },
    RoutePolicy { method: "POST", path: "/auth/2fa/verify", tier: LimitTier::Auth, identity: LimitIdentity::Ip },
    RoutePolicy { method: "POST", path: "/auth/forgot-password", tier: LimitTier::Sensitive, identity: LimitIdentity::Ip },
    RoutePolicy { method: "POST", path: "/auth/reset-password/:token", tier: LimitTier::Sensitive, identity: LimitIdentity::Ip },
    RoutePolicy { method: "POST", path: "/auth/2fa/setup", tier: LimitTier::Sensitive, identity: LimitIdentity::UserOrIp },
    RoutePolicy { method: "DELETE", path: "/auth/2fa", tier: LimitTier::Sensitive, identity: LimitIdentity::UserOrIp },
];

pub fn route_policy(method: &Method, path: &str) -> Option<&'static RoutePolicy> {
    ROUTE_POLICY_TABLE
        .iter()
        .find(|p| p.method == method.as_str() && p.path == path)
}

static LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn set_limit_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER.clone(), HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER.clone(), HeaderValue::from(decision.remaining));
    headers.insert(
        RESET_HEADER.clone(),
        HeaderValue::from(decision.reset_at.timestamp()),
    );
}

fn reject(
    state: &AppState,
    tier: LimitTier,
    decision: &RateDecision,
    ip: &str,
    path: &str,
) -> Response {
    let retry_after = decision.retry_after_secs(state.limiter.now());
    tracing::warn!(tier = tier.as_str(), ip, path, retry_after, "Rate limit exceeded");
    state.audit.log_event(
        SecurityEventType::RateLimitExceeded,
        None,
        Some(ip),
        None,
        json!({
            "tier": tier.as_str(),
            "path": path,
            "degraded": decision.degraded,
            "reset_at": decision.reset_at,
        }),
    );

    let mut response = AppError::TooManyRequests(
        "Too many requests. Please try again later.".to_string(),
        Some(retry_after),
    )
    .into_response();
    set_limit_headers(&mut response, decision);
    response
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(
        req.headers(),
        req.extensions(),
        &state.config.security.trusted_proxies,
    );
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let api = state.limiter.check_tier(LimitTier::Api, &ip).await;
    if !api.allowed {
        return reject(&state, LimitTier::Api, &api, &ip, &path);
    }

    let mut gated = None;
    if let Some(policy) = route_policy(req.method(), &path) {
        let identity = match policy.identity {
            LimitIdentity::Ip => ip.clone(),
            LimitIdentity::UserOrIp => bearer_token(req.headers())
                .and_then(|t| state.tokens.validate_access(t).ok())
                .map(|claims| claims.sub.to_string())
                .unwrap_or_else(|| ip.clone()),
        };
        let decision = state.limiter.check_tier(policy.tier, &identity).await;
        if !decision.allowed {
            return reject(&state, policy.tier, &decision, &ip, &path);
        }
        gated = Some((policy.tier, decision));
    }

    let mut response = next.run(req).await;

    match &gated {
        Some((tier, decision)) => {
            if response.status().is_success() {
                state.limiter.record_success(*tier, decision).await;
            }
            set_limit_headers(&mut response, decision);
        }
        None => set_limit_headers(&mut response, &api),
    }
    response
}
