//! `sellerdesk-marketplace`: authenticated client for the external marketplace.
//!
//! ## Components
//!
//! - `MarketplaceClient`: per-account client; owns the refresh-once-and-retry rule
//! - `OAuthClient`: authorization URL, code exchange, token refresh, `/me`
//! - `CredentialStore`: seam through which refreshed tokens are persisted inside
//!   the caller's transaction
//! - `types`: typed request/response shapes for the wrapped endpoints

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod media;
pub mod oauth;
pub mod types;

pub use client::{ApiRequest, Marketplace, MarketplaceClient};
pub use config::MarketplaceConfig;
pub use credentials::{CredentialStore, CredentialStoreError, InMemoryCredentialStore};
pub use error::ApiError;
pub use media::{EndpointFamily, MediaType};
pub use oauth::{OAuthClient, TokenGrant};
