use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::auth::TokenResponse;
use crate::models::{SessionInfo, UserResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorSetupResponse {
    /// Base32 secret for manual entry
    pub secret: String,
    #[schema(example = "otpauth://totp/RentalMarketplace:renter%40example.com?secret=...")]
    pub provisioning_uri: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorVerifyRequest {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    #[schema(example = "123456")]
    pub code: String,
}

/// Setup confirmation returns only the flag; a login challenge also
/// returns the established session's tokens.
#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorVerifyResponse {
    pub two_factor_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<uuid::Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorDisableRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}
