//! OAuth 2.0 authorization-code flow against the marketplace.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::MarketplaceConfig;
use crate::error::ApiError;
use crate::media::MediaType;
use crate::types::MarketplaceUser;

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Token endpoint response.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent on some refresh responses; the caller keeps the current one then.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Talks to the authorization server on behalf of the registered application.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: Arc<MarketplaceConfig>,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, config: Arc<MarketplaceConfig>) -> Self {
        Self { http, config }
    }

    /// URL the seller visits to grant access; `state` comes back on the redirect.
    pub fn authorization_url(&self, state: &str) -> Result<String, ApiError> {
        let base = format!("{}/authorize", self.config.auth_url);
        let url = reqwest::Url::parse_with_params(
            &base,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("prompt", "confirm"),
                ("state", state),
            ],
        )
        .map_err(|e| ApiError::Validation(format!("invalid authorization url {base}: {e}")))?;
        Ok(url.into())
    }

    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ApiError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    /// Identity of the user an access token belongs to.
    #[instrument(skip(self, access_token))]
    pub async fn fetch_me(&self, access_token: &str) -> Result<MarketplaceUser, ApiError> {
        let response = self
            .http
            .get(format!("{}/me", self.config.api_url))
            .bearer_auth(access_token)
            .header(ACCEPT, MediaType::PublicV1.as_str())
            .timeout(self.config.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() == 401 {
            return Err(ApiError::AuthExpired);
        }
        if !status.is_success() {
            return Err(ApiError::Marketplace {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Validation(format!("/me: {e}")))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ApiError> {
        let response = self
            .http
            .post(format!("{}/token", self.config.auth_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .timeout(self.config.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Marketplace {
                status: status.as_u16(),
                body,
            });
        }

        let grant: TokenGrant = serde_json::from_str(&body)
            .map_err(|e| ApiError::Validation(format!("token response: {e}")))?;
        debug!(expires_in = ?grant.expires_in, "token grant received");
        Ok(grant)
    }
}
