//! AES-256-GCM token cipher.
//!
//! Every call to [`TokenCipher::encrypt`] draws a fresh random 96-bit nonce.
//! The stored form is `base64(nonce || ciphertext || tag)`.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

use crate::VaultError;

/// Opaque encrypt/decrypt of token strings.
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError>;
}

impl<C> TokenCipher for Arc<C>
where
    C: TokenCipher + ?Sized,
{
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        (**self).encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        (**self).decrypt(ciphertext)
    }
}

/// AES-256-GCM cipher keyed with 32 raw bytes.
pub struct AesGcmCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl core::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    pub fn new(key: &[u8; 32]) -> Result<Self, VaultError> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| VaultError::InvalidKey("failed to create AES-256-GCM key".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Build from a base64-encoded 32-byte key (the `ENCRYPTION_KEY` format).
    pub fn from_base64_key(encoded: &str) -> Result<Self, VaultError> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidKey(format!("key is not valid base64: {e}")))?;
        let key: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            VaultError::InvalidKey(format!("key must be 32 bytes, got {}", raw.len()))
        })?;
        Self::new(&key)
    }

    /// Generate a random key, base64-encoded.
    pub fn generate_base64_key() -> Result<String, VaultError> {
        let mut key = [0u8; 32];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| VaultError::InvalidKey("failed to generate random key".to_string()))?;
        Ok(STANDARD.encode(key))
    }
}

impl TokenCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| VaultError::Encrypt)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let sealed = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| VaultError::Malformed(format!("not valid base64: {e}")))?;
        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(VaultError::Malformed(format!(
                "ciphertext too short ({} bytes)",
                sealed.len()
            )));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| VaultError::Malformed("bad nonce".to_string()))?;

        let mut in_out = body.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Decrypt)?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| VaultError::Malformed("plaintext is not UTF-8".to_string()))
    }
}
