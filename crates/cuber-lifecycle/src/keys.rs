//! RSA keypair generation, signing, and verification backing Export/GenKey/Import.
//! PKCS#1 v1.5 signatures over SHA-256, PKCS#8 PEM encoding for storage.

use cuber_types::LifecycleError;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

const KEY_BITS: usize = 2048;

/// A freshly minted RSA keypair, PEM-encoded for storage.
pub struct RsaKeyPair {
    pub private_key_pem: String,
    pub public_key_pem: String,
}

impl RsaKeyPair {
    /// Generate a new 2048-bit RSA keypair for a freshly exported package.
    pub fn generate() -> Result<Self, LifecycleError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| LifecycleError::Crypto(format!("rsa keygen: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);
        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| LifecycleError::Crypto(format!("encode private key: {e}")))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| LifecycleError::Crypto(format!("encode public key: {e}")))?;
        Ok(Self {
            private_key_pem,
            public_key_pem,
        })
    }
}

/// Recover the PEM-encoded public key from a retained private key, for ReKey,
/// which only has the `Export` record's private key on hand and needs the public half
/// to verify a key string the same way Import does.
pub fn public_key_from_private_pem(private_key_pem: &str) -> Result<String, LifecycleError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| LifecycleError::Crypto(format!("parse private key: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| LifecycleError::Crypto(format!("encode public key: {e}")))
}

/// Sign `payload` with the PEM-encoded RSA private key; returns the raw signature bytes.
pub fn sign_payload(private_key_pem: &str, payload: &[u8]) -> Result<Vec<u8>, LifecycleError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| LifecycleError::Crypto(format!("parse private key: {e}")))?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, payload);
    Ok(signature.to_bytes().to_vec())
}

/// Verify `signature` over `payload` against the PEM-encoded RSA public key.
/// Errors with [`LifecycleError::InvalidSignature`] on any mismatch or malformed input.
pub fn verify_signature(
    public_key_pem: &str,
    payload: &[u8],
    signature: &[u8],
) -> Result<(), LifecycleError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|_| LifecycleError::InvalidSignature)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature =
        Signature::try_from(signature).map_err(|_| LifecycleError::InvalidSignature)?;
    verifying_key
        .verify(payload, &signature)
        .map_err(|_| LifecycleError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_from_private_pem_matches_the_generated_pair() {
        let pair = RsaKeyPair::generate().unwrap();
        let recovered = public_key_from_private_pem(&pair.private_key_pem).unwrap();
        assert_eq!(recovered, pair.public_key_pem);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let pair = RsaKeyPair::generate().unwrap();
        let payload = b"export-uuid|permissions-json|key-id";
        let signature = sign_payload(&pair.private_key_pem, payload).unwrap();
        verify_signature(&pair.public_key_pem, payload, &signature).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let pair = RsaKeyPair::generate().unwrap();
        let signature = sign_payload(&pair.private_key_pem, b"original").unwrap();
        let err = verify_signature(&pair.public_key_pem, b"tampered", &signature).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSignature));
    }

    #[test]
    fn verify_rejects_foreign_keypair() {
        let pair_a = RsaKeyPair::generate().unwrap();
        let pair_b = RsaKeyPair::generate().unwrap();
        let signature = sign_payload(&pair_a.private_key_pem, b"payload").unwrap();
        let err = verify_signature(&pair_b.public_key_pem, b"payload", &signature).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSignature));
    }
}
