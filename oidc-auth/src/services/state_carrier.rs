//! Encrypted login parameters carried through the provider redirect.
//!
//! The packed token is `base64url(nonce || AES-256-GCM(json))` with a fresh
//! 96-bit nonce per token. Everything needed by the callback travels inside
//! the token, so no server-side session is kept between login and callback.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::ServiceError;

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Login context that has to survive the provider round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterCarrier {
    pub provider: String,
    pub platform: String,
    pub machine_code: String,
    pub vscode_version: String,
    pub uri_scheme: String,
    pub plugin_version: String,
    /// State value supplied by the client, used to poll for completion.
    pub state: String,
    pub invite_code: String,
}

#[derive(Clone)]
pub struct StateCarrier {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for StateCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCarrier").finish_non_exhaustive()
    }
}

impl StateCarrier {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Build from a standard base64 encoded 32 byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, anyhow::Error> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("State encryption key is not valid base64: {}", e))?;
        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                "State encryption key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )
        })?;
        Ok(Self::new(&key))
    }

    pub fn pack(&self, carrier: &ParameterCarrier) -> Result<String, ServiceError> {
        let plaintext = serde_json::to_vec(carrier)
            .map_err(|e| ServiceError::DataEncryption(format!("serialize: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| ServiceError::DataEncryption(format!("encrypt: {}", e)))?;

        let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Reverse of [`pack`](Self::pack). Any corruption fails closed.
    pub fn unpack(&self, token: &str) -> Result<ParameterCarrier, ServiceError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| ServiceError::DataDecryption(format!("decode: {}", e)))?;
        if raw.len() <= NONCE_SIZE {
            return Err(ServiceError::DataDecryption("token too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| ServiceError::DataDecryption("authentication failed".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| ServiceError::DataDecryption(format!("deserialize: {}", e)))
    }
}
