//! Services layer for rental-auth.
//!
//! Token, session, MFA, rate-limit, RBAC and audit engines plus the
//! orchestrator that combines them.

pub mod auth;
pub mod clock;
pub mod credentials;
mod database;
pub mod error;
pub mod metrics;
pub mod mfa;
mod notification_client;
pub mod rate_limiter;
pub mod rbac;
pub mod redis;
pub mod security_audit;
pub mod session;
pub mod store;
pub mod token;

pub use auth::{AccountSettings, AuthService, EstablishedSession};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialError, InMemoryUserRepository, UserRepository};
pub use database::Database;
pub use error::ServiceError;
pub use mfa::{MfaContext, MfaEngine, MfaEnrollment, MfaError};
pub use notification_client::{
    NoopNotifier, Notification, NotificationClient, NotificationDispatcher, RecordingNotifier,
    SecurityNotifier, SentNotification,
};
pub use rate_limiter::{FailureMode, LimitTier, PolicyTable, RateDecision, RateLimiter, RatePolicy};
pub use rbac::RbacEvaluator;
pub use redis::RedisStore;
pub use security_audit::{
    AuditFilter, AuditRepository, AuditSettings, InMemoryAuditRepository, SecurityAuditLog,
};
pub use session::{CreatedSession, SessionError, SessionRegistry};
pub use store::{InMemoryStore, SharedStore, StoreError};
pub use token::{
    AccessTokenClaims, IssuedToken, RefreshTokenClaims, RotatedRefreshToken, TemporaryTokenClaims,
    TokenError, TokenKind, TokenPair, TokenService, TokenSettings,
};
