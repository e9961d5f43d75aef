use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.allegro.pl";
pub const DEFAULT_AUTH_URL: &str = "https://allegro.pl/auth/oauth";

/// Marketplace endpoints and OAuth application credentials.
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// REST API base URL (no trailing slash)
    pub api_url: String,
    /// OAuth base URL; `/authorize` and `/token` are appended
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl MarketplaceConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = trim_trailing_slash(url.into());
        self
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = trim_trailing_slash(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
