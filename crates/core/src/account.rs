//! Linked marketplace accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{LinkedAccountId, TenantId};

/// OAuth token pair as stored: both tokens are ciphertext produced by the vault.
///
/// Plaintext tokens never live in this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Auto-reply configuration of a linked account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReplySettings {
    pub enabled: bool,
    pub text: Option<String>,
}

impl AutoReplySettings {
    pub fn enabled(text: impl Into<String>) -> Self {
        Self {
            enabled: true,
            text: Some(text.into()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// The text to send, if auto-reply is on and has something to say.
    pub fn reply_text(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// A tenant's credential-bearing connection to the external marketplace.
///
/// At most one row exists per `(tenant_id, external_user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub id: LinkedAccountId,
    pub tenant_id: TenantId,
    /// Marketplace-side user id.
    pub external_user_id: String,
    /// Marketplace-side login, used in notifications and logs.
    pub login: String,
    pub tokens: SealedTokens,
    pub auto_reply: AutoReplySettings,
}

impl LinkedAccount {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.tokens.expires_at <= now
    }
}

/// Input for linking (or re-linking) an account after a successful OAuth exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLinkedAccount {
    pub tenant_id: TenantId,
    pub external_user_id: String,
    pub login: String,
    pub tokens: SealedTokens,
}
