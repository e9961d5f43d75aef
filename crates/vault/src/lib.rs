//! `sellerdesk-vault`: encryption of stored OAuth tokens.
//!
//! Callers only see the [`TokenCipher`] seam; [`AesGcmCipher`] is the production
//! implementation.

pub mod cipher;

pub use cipher::{AesGcmCipher, TokenCipher};

/// Vault error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: wrong key or corrupted ciphertext")]
    Decrypt,
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
}
