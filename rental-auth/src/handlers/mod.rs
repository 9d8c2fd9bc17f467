//! HTTP handlers for rental-auth.

pub mod audit;
pub mod auth;
pub mod metrics;
pub mod sessions;
pub mod user;

pub use audit::list_audit_events;
pub use auth::*;
pub use sessions::{list_sessions, revoke_session};
pub use user::{delete_account, get_me};
