pub mod audit_event;
pub mod permission;
pub mod refresh_token;
pub mod session;
pub mod user;

pub use audit_event::{SecurityAuditEvent, SecurityEventType, Severity};
pub use permission::{Permission, WILDCARD};
pub use refresh_token::{RefreshToken, RevocationReason};
pub use session::{DeviceInfo, Session, SessionInfo};
pub use user::{Role, User, UserResponse};
