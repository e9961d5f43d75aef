//! OAuth account linking: authorization URL, code exchange and the encrypted
//! upsert of the linked account.

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument};

use sellerdesk_core::{DomainError, LinkedAccount, NewLinkedAccount, SealedTokens, TenantId};
use sellerdesk_marketplace::{ApiError, Marketplace};

use crate::accounts::AccountRepository;
use crate::error::StoreError;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid state parameter: {0}")]
    InvalidState(#[from] DomainError),

    #[error("authorization server granted no refresh token")]
    MissingRefreshToken,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct AccountLinker<R> {
    marketplace: Marketplace,
    accounts: R,
}

impl<R: AccountRepository> AccountLinker<R> {
    pub fn new(marketplace: Marketplace, accounts: R) -> Self {
        Self { marketplace, accounts }
    }

    /// Consent URL for `tenant_id`; the tenant id travels as the `state`.
    pub fn authorization_url(&self, tenant_id: TenantId) -> Result<String, LinkError> {
        Ok(self.marketplace.oauth().authorization_url(&tenant_id.to_string())?)
    }

    /// Handle the redirect back: `state` is the tenant id handed out above.
    pub async fn complete(&self, state: &str, code: &str) -> Result<LinkedAccount, LinkError> {
        let tenant_id: TenantId = state.parse()?;
        self.link(tenant_id, code).await
    }

    /// Exchange `code`, look up the marketplace user and store the account.
    /// Relinking the same marketplace user replaces its tokens.
    #[instrument(skip(self, code), fields(tenant_id = %tenant_id))]
    pub async fn link(&self, tenant_id: TenantId, code: &str) -> Result<LinkedAccount, LinkError> {
        let oauth = self.marketplace.oauth();
        let grant = oauth.exchange_code(code).await?;
        let refresh_token = grant
            .refresh_token
            .as_deref()
            .ok_or(LinkError::MissingRefreshToken)?;
        let me = oauth.fetch_me(&grant.access_token).await?;

        let cipher = self.marketplace.cipher();
        let tokens = SealedTokens {
            access_token: cipher.encrypt(&grant.access_token).map_err(ApiError::from)?,
            refresh_token: cipher.encrypt(refresh_token).map_err(ApiError::from)?,
            expires_at: grant.expires_at(Utc::now()),
        };

        let account = self
            .accounts
            .link_account(NewLinkedAccount {
                tenant_id,
                external_user_id: me.id,
                login: me.login,
                tokens,
            })
            .await?;
        info!(account_id = %account.id, login = %account.login, "marketplace account linked");
        Ok(account)
    }
}
