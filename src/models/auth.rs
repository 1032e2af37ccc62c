//! Login and token refresh payloads

use serde::{Deserialize, Serialize};

use super::{Tenant, User};

pub const LOGIN_PATH: &str = "/api/mobile/auth/login";
pub const REFRESH_PATH: &str = "/api/mobile/auth/refresh";

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_code: Option<String>,
}

/// `data` of a successful login envelope.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    pub tenant: Option<Tenant>,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// The server may or may not rotate the refresh token.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
    pub refresh_token: Option<String>,
}
