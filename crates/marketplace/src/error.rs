use sellerdesk_vault::VaultError;
use thiserror::Error;

use crate::credentials::CredentialStoreError;

/// Marketplace call failure.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The access token was rejected (401), and a refresh did not help.
    #[error("marketplace rejected the access token")]
    AuthExpired,

    /// Upstream 4xx/5xx other than an auth rejection.
    #[error("marketplace error {status}: {body}")]
    Marketplace { status: u16, body: String },

    /// Network-level failure (timeout, connection refused, truncated body).
    #[error("marketplace unavailable: {0}")]
    ServiceUnavailable(String),

    /// Response did not match the expected shape.
    #[error("unexpected response shape: {0}")]
    Validation(String),

    /// The refresh token itself was rejected; the account must be re-linked.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Credentials(#[from] CredentialStoreError),
}

impl ApiError {
    /// Whether a later attempt could plausibly succeed unchanged.
    ///
    /// Informational only; nothing retries automatically today.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::ServiceUnavailable(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::ServiceUnavailable(format!("request timed out: {err}"))
        } else if err.is_connect() {
            ApiError::ServiceUnavailable(format!("connection failed: {err}"))
        } else {
            ApiError::ServiceUnavailable(err.to_string())
        }
    }
}
