use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::StoreError;

const NONCE_LEN: usize = 12;

/// Symmetric AES-256-GCM codec behind the abstract "encrypted at rest" /
/// `decrypt_secret` datastore operation in spec §6. The key comes from
/// `credentials.encryption_key` (configuration); any string is accepted and
/// stretched to 32 bytes via SHA-256 so operators can configure a
/// passphrase rather than exact key bytes.
pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl SecretCodec {
    pub fn new(encryption_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(encryption_key.as_bytes());
        let key_bytes = hasher.finalize();
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        SecretCodec { cipher: Aes256Gcm::new(key) }
    }

    /// Returns `nonce || ciphertext`, the format stored in `Credential::encrypted_secret`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| StoreError::Internal(format!("secret encryption failed: {e}")))?;
        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, stored: &[u8]) -> Result<Vec<u8>, StoreError> {
        if stored.len() < NONCE_LEN {
            return Err(StoreError::Decrypt("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = stored.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| StoreError::Decrypt(e.to_string()))
    }
}

/// Hex-encoded SHA-256 of `bytes` — the content-address used by the blob
/// store and the `backup` handler.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let codec = SecretCodec::new("correct horse battery staple");
        let ciphertext = codec.encrypt(b"hunter2").unwrap();
        assert_ne!(ciphertext, b"hunter2".to_vec());
        let plaintext = codec.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let ciphertext = SecretCodec::new("key-a").encrypt(b"hunter2").unwrap();
        assert!(SecretCodec::new("key-b").decrypt(&ciphertext).is_err());
    }

    #[test]
    fn content_hash_is_stable_and_collision_resistant_for_distinct_inputs() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }
}
