//! Fixtures shared by the crate's tests.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use sellerdesk_core::{LinkedAccount, NewLinkedAccount, SealedTokens, TenantId};
use sellerdesk_marketplace::{Marketplace, MarketplaceConfig};
use sellerdesk_vault::{AesGcmCipher, TokenCipher};

use crate::accounts::AccountRepository;
use crate::memory::InMemoryStore;
use crate::schema;

/// Pool against `TEST_DATABASE_URL` with the schema applied, or `None` to skip.
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    schema::apply(&pool).await.expect("apply schema");
    Some(pool)
}

/// Serializes tests that share (and truncate) the test database.
pub async fn db_guard() -> tokio::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| tokio::sync::Mutex::new(())).lock().await
}

/// Account input with placeholder (undecryptable) tokens.
pub fn new_account(external_user_id: &str) -> NewLinkedAccount {
    NewLinkedAccount {
        tenant_id: TenantId::new(),
        external_user_id: external_user_id.to_string(),
        login: format!("login-{external_user_id}"),
        tokens: SealedTokens {
            access_token: "sealed-access".into(),
            refresh_token: "sealed-refresh".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        },
    }
}

pub fn cipher() -> Arc<dyn TokenCipher> {
    Arc::new(AesGcmCipher::new(&[9u8; 32]).expect("static key"))
}

/// Marketplace pointed at a mock server for both the API and OAuth.
pub fn marketplace(uri: &str) -> Marketplace {
    let config = MarketplaceConfig::new("app", "secret", "https://seller.example/cb")
        .with_api_url(uri)
        .with_auth_url(uri)
        .with_timeout(Duration::from_secs(2));
    Marketplace::new(config, cipher()).expect("marketplace")
}

/// Link an account whose tokens decrypt to `access-0` / `refresh-0`.
pub async fn seed_account(store: &InMemoryStore, mp: &Marketplace, login: &str) -> LinkedAccount {
    let tokens = SealedTokens {
        access_token: mp.cipher().encrypt("access-0").expect("encrypt"),
        refresh_token: mp.cipher().encrypt("refresh-0").expect("encrypt"),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    };
    store
        .link_account(NewLinkedAccount {
            tenant_id: TenantId::new(),
            external_user_id: format!("ext-{login}"),
            login: login.to_string(),
            tokens,
        })
        .await
        .expect("link account")
}
