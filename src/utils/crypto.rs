use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::models::Credentials;
use crate::utils::AppError;

const NONCE_LEN: usize = 12;
const DEV_KEY_PHRASE: &str = "datasource-hub-development-credential-key";

/// Seals connection credentials at rest. Plaintext only exists between
/// `seal`'s caller handing it over and `open`'s caller dropping the result.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Arc<Aes256Gcm>,
}

impl CredentialVault {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        CredentialVault {
            cipher: Arc::new(Aes256Gcm::new(key)),
        }
    }

    /// Build the vault from the configured base64 key, or from a fixed
    /// development key when none is configured.
    pub fn from_config(encoded_key: Option<&str>) -> Result<Self, AppError> {
        match encoded_key {
            Some(encoded) => {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| AppError::Crypto(format!("CREDENTIAL_KEY is not base64: {}", e)))?;
                let key: [u8; 32] = bytes.try_into().map_err(|_| {
                    AppError::Crypto("CREDENTIAL_KEY must decode to exactly 32 bytes".to_string())
                })?;
                Ok(Self::new(&key))
            }
            None => {
                warn!("⚠️  CREDENTIAL_KEY not set, using the development key. Do not use this in production");
                let digest = Sha256::digest(DEV_KEY_PHRASE.as_bytes());
                let mut key = [0u8; 32];
                key.copy_from_slice(&digest);
                Ok(Self::new(&key))
            }
        }
    }

    /// Encrypt a credential map to base64(nonce || ciphertext).
    pub fn seal(&self, secrets: &BTreeMap<String, String>) -> Result<String, AppError> {
        let plaintext = serde_json::to_vec(secrets)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| AppError::Crypto("failed to encrypt credentials".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<Credentials, AppError> {
        Ok(Credentials::from_plain(self.open_plain(sealed)?))
    }

    /// Decrypt to plaintext. Used only to merge an update into the stored set
    /// before re-sealing it.
    pub fn open_plain(&self, sealed: &str) -> Result<BTreeMap<String, String>, AppError> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|_| AppError::Crypto("stored credentials are corrupted".to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(AppError::Crypto("stored credentials are truncated".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Crypto("failed to decrypt credentials (wrong key?)".to_string()))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
