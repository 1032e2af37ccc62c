//! Error taxonomy for the request pipeline

/// Why a session could not be kept alive after a 401.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthExpiredReason {
    #[error("no refresh token stored")]
    NoRefreshToken,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("request was rejected again after token refresh")]
    RetryRejected,
}

/// Every way a call made through [`super::client::ApiClient`] can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No response was received (DNS, connect, timeout, truncated body).
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx status other than a 401 handled by the refresh path.
    /// `message` is the envelope's message when the body carried one.
    #[error("HTTP {status}")]
    Http {
        status: u16,
        body: String,
        message: Option<String>,
    },

    /// A 401 the refresh coordinator could not resolve. Fatal to the session.
    #[error("session expired: {0}")]
    AuthExpired(AuthExpiredReason),

    /// 2xx response whose envelope reported `success: false`.
    #[error("{message}")]
    Business {
        code: Option<String>,
        message: String,
    },

    /// Protected path requested without an access token; nothing was sent.
    #[error("login required for {path}")]
    LoginRequired { path: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl ApiError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => "Network error, please check your connection".to_string(),
            ApiError::Http {
                status, message, ..
            } => match status {
                403 => "Permission denied".to_string(),
                404 => "Resource not found".to_string(),
                500 => "Server error".to_string(),
                _ => message
                    .clone()
                    .unwrap_or_else(|| format!("Request failed ({})", status)),
            },
            ApiError::AuthExpired(_) => "Session expired, please log in again".to_string(),
            ApiError::Business { message, .. } => message.clone(),
            ApiError::LoginRequired { .. } => "Please log in first".to_string(),
            ApiError::InvalidResponse(_) => "Unexpected response from server".to_string(),
            ApiError::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            ApiError::Storage(_) => "Could not save credentials".to_string(),
        }
    }

    /// Only an expired session forces a logout; everything else may be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::AuthExpired(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::AuthExpired(AuthExpiredReason::RetryRejected) => Some(401),
            _ => None,
        }
    }
}
