//! At-rest encryption for provider API keys persisted in a Cube's configuration:
//! AES-256-GCM under `CUBER_CRYPTO_SECRET_KEY`.
//!
//! The secret key is a 64-character hex string (32 raw bytes) matching the
//! environment variable's documented format. Ciphertext is returned/expected as
//! base64 of `nonce || tag+ciphertext`, so the stored value is a single opaque string.

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use cuber_types::LifecycleError;

const NONCE_LEN: usize = 12;

fn cipher_from_hex_key(secret_key_hex: &str) -> Result<Aes256Gcm, LifecycleError> {
    let raw = hex::decode(secret_key_hex)
        .map_err(|e| LifecycleError::Crypto(format!("secret key is not valid hex: {e}")))?;
    if raw.len() != 32 {
        return Err(LifecycleError::Crypto(format!(
            "secret key must decode to 32 bytes, got {}",
            raw.len()
        )));
    }
    let key = Key::<Aes256Gcm>::from_slice(&raw);
    Ok(Aes256Gcm::new(key))
}

/// Encrypt `plaintext` (an API key) under `secret_key_hex`. Returns base64(nonce || ct).
pub fn encrypt_secret(secret_key_hex: &str, plaintext: &str) -> Result<String, LifecycleError> {
    let cipher = cipher_from_hex_key(secret_key_hex)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| LifecycleError::Crypto(format!("encrypt: {e}")))?;
    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(nonce.as_slice());
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Decrypt a value produced by [`encrypt_secret`]. Returns the original API key.
pub fn decrypt_secret(secret_key_hex: &str, encoded: &str) -> Result<String, LifecycleError> {
    let cipher = cipher_from_hex_key(secret_key_hex)?;
    let combined = STANDARD
        .decode(encoded)
        .map_err(|e| LifecycleError::Crypto(format!("secret is not valid base64: {e}")))?;
    if combined.len() < NONCE_LEN {
        return Err(LifecycleError::Crypto("encrypted secret too short".into()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| LifecycleError::Crypto(format!("decrypt: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| LifecycleError::Crypto(format!("not utf8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn key() -> &'static str {
        &SECRET[..64]
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let encrypted = encrypt_secret(key(), "sk-live-abc123").unwrap();
        let decrypted = decrypt_secret(key(), &encrypted).unwrap();
        assert_eq!(decrypted, "sk-live-abc123");
    }

    #[test]
    fn decrypting_with_wrong_key_fails() {
        let other = "0202020202020202020202020202020202020202020202020202020202020202";
        let encrypted = encrypt_secret(key(), "sk-live-abc123").unwrap();
        assert!(decrypt_secret(&other[..64], &encrypted).is_err());
    }

    #[test]
    fn ciphertext_is_not_plaintext() {
        let encrypted = encrypt_secret(key(), "sk-live-abc123").unwrap();
        assert!(!encrypted.contains("sk-live-abc123"));
    }
}
