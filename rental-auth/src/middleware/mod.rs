pub mod auth;
pub mod rate_limit;
pub mod rbac;
pub mod request_meta;

pub use auth::{auth_middleware, bearer_token, AuthenticatedContext, TwoFactorCaller};
pub use rate_limit::{rate_limit_middleware, route_policy, LimitIdentity, RoutePolicy, ROUTE_POLICY_TABLE};
pub use rbac::{permission_middleware, require_permission, RequiredPermission};
pub use request_meta::{client_ip, RequestMeta, DEVICE_ID_HEADER};
