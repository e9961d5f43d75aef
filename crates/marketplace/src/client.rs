//! Per-account authenticated client.
//!
//! Every call goes through [`MarketplaceClient::request`]: on a 401 the refresh
//! token is exchanged once, the new pair is written through the caller's
//! [`CredentialStore`], and the request is retried exactly once.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use sellerdesk_core::{LinkedAccount, LinkedAccountId, SealedTokens};
use sellerdesk_vault::TokenCipher;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::config::MarketplaceConfig;
use crate::credentials::CredentialStore;
use crate::error::ApiError;
use crate::media::{EndpointFamily, MediaType};
use crate::oauth::OAuthClient;
use crate::types::{
    Attachment, AttachmentDeclaration, IssueChat, IssuesPage, Message, MessagesPage, NewMessage,
    ThreadsPage,
};

/// A single marketplace call, described independently of the account it runs as.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub media_type: MediaType,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            media_type,
        }
    }

    pub fn post(path: impl Into<String>, media_type: MediaType, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
            media_type,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Shared entry point: one HTTP pool, one OAuth application, one cipher.
///
/// Cheap to clone. Hands out a [`MarketplaceClient`] per linked account.
#[derive(Clone)]
pub struct Marketplace {
    http: reqwest::Client,
    config: Arc<MarketplaceConfig>,
    cipher: Arc<dyn TokenCipher>,
    oauth: OAuthClient,
}

impl Marketplace {
    pub fn new(config: MarketplaceConfig, cipher: Arc<dyn TokenCipher>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::ServiceUnavailable(format!("failed to build http client: {e}")))?;
        let config = Arc::new(config);
        let oauth = OAuthClient::new(http.clone(), Arc::clone(&config));
        Ok(Self {
            http,
            config,
            cipher,
            oauth,
        })
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    pub fn cipher(&self) -> &Arc<dyn TokenCipher> {
        &self.cipher
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// Client acting as `account`. Decrypts the access token up front.
    pub fn client_for(&self, account: LinkedAccount) -> Result<MarketplaceClient, ApiError> {
        let access_token = self.cipher.decrypt(&account.tokens.access_token)?;
        Ok(MarketplaceClient {
            http: self.http.clone(),
            config: Arc::clone(&self.config),
            cipher: Arc::clone(&self.cipher),
            oauth: self.oauth.clone(),
            account,
            access_token,
        })
    }
}

impl std::fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marketplace")
            .field("api_url", &self.config.api_url)
            .finish_non_exhaustive()
    }
}

/// Client bound to one linked account and its current tokens.
pub struct MarketplaceClient {
    http: reqwest::Client,
    config: Arc<MarketplaceConfig>,
    cipher: Arc<dyn TokenCipher>,
    oauth: OAuthClient,
    account: LinkedAccount,
    access_token: String,
}

impl MarketplaceClient {
    pub fn account(&self) -> &LinkedAccount {
        &self.account
    }

    pub fn account_id(&self) -> LinkedAccountId {
        self.account.id
    }

    /// Issue `req` as this account, refreshing and retrying once on a 401.
    ///
    /// An empty 2xx body yields an empty JSON object.
    #[instrument(skip(self, store, req), fields(account_id = %self.account.id, method = %req.method, path = %req.path))]
    pub async fn request<S>(&mut self, store: &mut S, req: &ApiRequest) -> Result<Value, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        match self.send_once(req).await {
            Err(ApiError::AuthExpired) => {
                warn!("access token rejected, refreshing");
                self.refresh_and_persist(store).await?;
                self.send_once(req).await
            }
            other => other,
        }
    }

    /// Exchange the refresh token and write the new pair through `store`.
    ///
    /// A rejected refresh leaves both the store and this client untouched.
    pub async fn refresh_and_persist<S>(&mut self, store: &mut S) -> Result<(), ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let refresh_token = self.cipher.decrypt(&self.account.tokens.refresh_token)?;
        let grant = match self.oauth.refresh(&refresh_token).await {
            Ok(grant) => grant,
            Err(ApiError::ServiceUnavailable(msg)) => return Err(ApiError::ServiceUnavailable(msg)),
            Err(e) => {
                error!(account_id = %self.account.id, error = %e, "token refresh rejected");
                return Err(ApiError::RefreshFailed(e.to_string()));
            }
        };

        let sealed_refresh = match &grant.refresh_token {
            Some(token) => self.cipher.encrypt(token)?,
            None => self.account.tokens.refresh_token.clone(),
        };
        let sealed = SealedTokens {
            access_token: self.cipher.encrypt(&grant.access_token)?,
            refresh_token: sealed_refresh,
            expires_at: grant.expires_at(Utc::now()),
        };

        store.store_tokens(self.account.id, &sealed).await?;
        debug!(account_id = %self.account.id, expires_at = %sealed.expires_at, "tokens refreshed");

        self.account.tokens = sealed;
        self.access_token = grant.access_token;
        Ok(())
    }

    pub async fn list_threads<S>(
        &mut self,
        store: &mut S,
        limit: u32,
        offset: u32,
    ) -> Result<ThreadsPage, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let req = ApiRequest::get("/messaging/threads", MediaType::PublicV1)
            .with_query("limit", limit)
            .with_query("offset", offset);
        decode("threads", self.request(store, &req).await?)
    }

    pub async fn list_messages<S>(
        &mut self,
        store: &mut S,
        thread_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let req = ApiRequest::get(
            format!("/messaging/threads/{thread_id}/messages"),
            MediaType::PublicV1,
        )
        .with_query("limit", limit)
        .with_query("offset", offset);
        let page: MessagesPage = decode("messages", self.request(store, &req).await?)?;
        Ok(page.messages)
    }

    pub async fn post_message<S>(
        &mut self,
        store: &mut S,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<Message, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let req = ApiRequest::post(
            format!("/messaging/threads/{thread_id}/messages"),
            MediaType::PublicV1,
            encode(message)?,
        );
        decode("posted message", self.request(store, &req).await?)
    }

    /// Declare an upload; the returned id is referenced from a message body.
    pub async fn declare_attachment<S>(
        &mut self,
        store: &mut S,
        family: EndpointFamily,
        declaration: &AttachmentDeclaration,
    ) -> Result<Attachment, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let req = ApiRequest::post(
            family.attachments_path(),
            family.media_type(),
            encode(declaration)?,
        );
        decode("attachment", self.request(store, &req).await?)
    }

    pub async fn list_issues<S>(
        &mut self,
        store: &mut S,
        limit: u32,
        offset: u32,
    ) -> Result<IssuesPage, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let req = ApiRequest::get("/sale/issues", MediaType::BetaV1)
            .with_query("limit", limit)
            .with_query("offset", offset);
        decode("issues", self.request(store, &req).await?)
    }

    pub async fn issue_chat<S>(&mut self, store: &mut S, issue_id: &str) -> Result<IssueChat, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let req = ApiRequest::get(format!("/sale/issues/{issue_id}/chat"), MediaType::BetaV1);
        decode("issue chat", self.request(store, &req).await?)
    }

    pub async fn post_issue_message<S>(
        &mut self,
        store: &mut S,
        issue_id: &str,
        message: &NewMessage,
    ) -> Result<Value, ApiError>
    where
        S: CredentialStore + ?Sized,
    {
        let req = ApiRequest::post(
            format!("/sale/issues/{issue_id}/message"),
            MediaType::BetaV1,
            encode(message)?,
        );
        self.request(store, &req).await
    }

    async fn send_once(&self, req: &ApiRequest) -> Result<Value, ApiError> {
        let mut builder = self
            .http
            .request(req.method.clone(), format!("{}{}", self.config.api_url, req.path))
            .bearer_auth(&self.access_token)
            .header(ACCEPT, req.media_type.as_str());
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| ApiError::Validation(format!("request body: {e}")))?;
            builder = builder.header(CONTENT_TYPE, req.media_type.as_str()).body(bytes);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 401 {
            return Err(ApiError::AuthExpired);
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "marketplace returned an error");
            return Err(ApiError::Marketplace {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Validation(format!("invalid json: {e}")))
    }
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Validation(format!("{what}: {e}")))
}

fn encode<T: serde::Serialize>(body: &T) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Validation(format!("request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;
    use crate::types::AuthorRole;
    use chrono::Duration;
    use sellerdesk_core::{AutoReplySettings, TenantId};
    use sellerdesk_vault::AesGcmCipher;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PUBLIC: &str = "application/vnd.allegro.public.v1+json";
    const BETA: &str = "application/vnd.allegro.beta.v1+json";

    fn cipher() -> Arc<dyn TokenCipher> {
        Arc::new(AesGcmCipher::new(&[3u8; 32]).unwrap())
    }

    fn marketplace(api_url: &str) -> Marketplace {
        let config = MarketplaceConfig::new("app", "secret", "https://seller.example/cb")
            .with_api_url(api_url)
            .with_auth_url(api_url)
            .with_timeout(std::time::Duration::from_secs(2));
        Marketplace::new(config, cipher()).unwrap()
    }

    fn account(mp: &Marketplace) -> LinkedAccount {
        LinkedAccount {
            id: LinkedAccountId::new(7),
            tenant_id: TenantId::new(),
            external_user_id: "u-7".into(),
            login: "shop".into(),
            tokens: SealedTokens {
                access_token: mp.cipher().encrypt("old-access").unwrap(),
                refresh_token: mp.cipher().encrypt("old-refresh").unwrap(),
                expires_at: Utc::now() + Duration::hours(1),
            },
            auto_reply: AutoReplySettings::disabled(),
        }
    }

    fn threads_body() -> Value {
        json!({
            "threads": [
                { "id": "t1", "read": false, "interlocutor": { "login": "buyer1" } }
            ],
            "offset": 0,
            "limit": 20
        })
    }

    #[tokio::test]
    async fn lists_threads_with_bearer_and_public_media_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(query_param("limit", "20"))
            .and(query_param("offset", "0"))
            .and(header("authorization", "Bearer old-access"))
            .and(header("accept", PUBLIC))
            .respond_with(ResponseTemplate::new(200).set_body_json(threads_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let page = client.list_threads(&mut store, 20, 0).await.unwrap();
        assert_eq!(page.threads.len(), 1);
        assert_eq!(page.threads[0].id, "t1");
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn refreshes_once_on_401_and_persists_new_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(header("authorization", "Bearer old-access"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(header("authorization", "Bearer new-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(threads_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(wiremock::matchers::body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 43200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let page = client.list_threads(&mut store, 20, 0).await.unwrap();
        assert_eq!(page.threads.len(), 1);

        let stored = store.latest(LinkedAccountId::new(7)).unwrap();
        assert_eq!(mp.cipher().decrypt(&stored.access_token).unwrap(), "new-access");
        assert_eq!(mp.cipher().decrypt(&stored.refresh_token).unwrap(), "new-refresh");
        assert!(stored.expires_at > Utc::now() + Duration::hours(11));
        assert_eq!(&client.account().tokens, stored);
    }

    #[tokio::test]
    async fn second_401_after_refresh_is_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let err = client.list_threads(&mut store, 20, 0).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthExpired));
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_tokens_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .expect(1)
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let original = account(&mp);
        let mut client = mp.client_for(original.clone()).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let err = client.list_threads(&mut store, 20, 0).await.unwrap_err();
        assert!(matches!(err, ApiError::RefreshFailed(_)));
        assert!(store.writes().is_empty());
        assert_eq!(client.account().tokens, original.tokens);
    }

    #[tokio::test]
    async fn refresh_without_new_refresh_token_keeps_the_current_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(header("authorization", "Bearer old-access"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(header("authorization", "Bearer new-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(threads_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "new-access" })),
            )
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let original = account(&mp);
        let mut client = mp.client_for(original.clone()).unwrap();
        let mut store = InMemoryCredentialStore::new();

        client.list_threads(&mut store, 20, 0).await.unwrap();
        let stored = store.latest(original.id).unwrap();
        assert_eq!(stored.refresh_token, original.tokens.refresh_token);
    }

    #[tokio::test]
    async fn upstream_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads/t1/messages"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let err = client.list_messages(&mut store, "t1", 1, 0).await.unwrap_err();
        match err {
            ApiError::Marketplace { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_is_service_unavailable() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let mp = marketplace(&uri);
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let err = client.list_threads(&mut store, 20, 0).await.unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unexpected_shape_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let err = client.list_threads(&mut store, 20, 0).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn posts_regular_message_with_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messaging/threads/t1/messages"))
            .and(header("content-type", PUBLIC))
            .and(body_json(json!({ "text": "Thanks!", "type": "REGULAR", "attachment": null })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "m9",
                "author": { "login": "shop", "role": "SELLER" },
                "text": "Thanks!"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let posted = client
            .post_message(&mut store, "t1", &NewMessage::text("Thanks!"))
            .await
            .unwrap();
        assert_eq!(posted.id, "m9");
        assert_eq!(posted.author.role, AuthorRole::Seller);
    }

    #[tokio::test]
    async fn issue_endpoints_use_beta_media_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sale/issues"))
            .and(header("accept", BETA))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [{ "id": "i1", "type": "DISPUTE", "status": "ONGOING" }],
                "count": 1
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sale/issues/attachments"))
            .and(header("accept", BETA))
            .and(body_json(json!({ "fileName": "invoice.pdf", "size": 1024 })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "att-1" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sale/issues/i1/message"))
            .and(header("content-type", BETA))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let mp = marketplace(&server.uri());
        let mut client = mp.client_for(account(&mp)).unwrap();
        let mut store = InMemoryCredentialStore::new();

        let issues = client.list_issues(&mut store, 10, 0).await.unwrap();
        assert_eq!(issues.issues[0].kind.as_deref(), Some("DISPUTE"));

        let attachment = client
            .declare_attachment(
                &mut store,
                EndpointFamily::Issues,
                &AttachmentDeclaration {
                    file_name: "invoice.pdf".into(),
                    size: 1024,
                },
            )
            .await
            .unwrap();
        assert_eq!(attachment.id, "att-1");

        let posted = client
            .post_issue_message(
                &mut store,
                "i1",
                &NewMessage::text("see attached").with_attachment(attachment.id),
            )
            .await
            .unwrap();
        assert_eq!(posted, json!({}));
    }
}
