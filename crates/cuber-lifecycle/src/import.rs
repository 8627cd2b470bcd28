//! Import/ReKey verification: unpack a `.cube` package, check its integrity, and
//! verify a GenKey key string against the package's embedded public key.
//!
//! Burn-ledger bookkeeping (has this `key_id` been consumed before?) and the
//! transactional "copy db into new Cube location, insert lineage/BurnedKey rows, roll
//! back on any failure" sequencing are the caller's responsibility — this module only
//! answers "is this package and key cryptographically valid right now".

use crate::genkey::SignedKey;
use crate::keys::verify_signature;
use base64::{engine::general_purpose::STANDARD, Engine};
use cuber_types::lifecycle::{ExportManifest, KeyPayload};
use cuber_types::LifecycleError;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};

/// An unpacked, integrity-checked `.cube` package.
pub struct ImportedPackage {
    pub manifest: ExportManifest,
    pub db_bytes: Vec<u8>,
}

/// Unpack `zip_bytes` and verify the database file's SHA-256 matches both the
/// manifest's declared `content_hash` and the package's standalone `hash.txt`.
pub fn import_package(zip_bytes: &[u8]) -> Result<ImportedPackage, LifecycleError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| LifecycleError::Validation(format!("not a valid zip package: {e}")))?;

    let manifest: ExportManifest = {
        let mut file = archive
            .by_name("manifest.json")
            .map_err(|_| LifecycleError::Validation("package missing manifest.json".into()))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        serde_json::from_str(&buf)
            .map_err(|e| LifecycleError::Validation(format!("malformed manifest.json: {e}")))?
    };

    let hash_txt = {
        let mut file = archive
            .by_name("hash.txt")
            .map_err(|_| LifecycleError::Validation("package missing hash.txt".into()))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        buf.trim().to_string()
    };

    let db_name = format!("{}.db", manifest.export_uuid);
    let db_bytes = {
        let mut file = archive
            .by_name(&db_name)
            .map_err(|_| LifecycleError::Validation(format!("package missing {db_name}")))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        buf
    };

    let mut hasher = Sha256::new();
    hasher.update(&db_bytes);
    let computed_hash = hex::encode(hasher.finalize());

    if computed_hash != manifest.content_hash || computed_hash != hash_txt {
        return Err(LifecycleError::Validation(
            "package content hash does not match its manifest or hash.txt".into(),
        ));
    }

    Ok(ImportedPackage { manifest, db_bytes })
}

/// Verify a GenKey key string's signature against `public_key_pem` and its expiry
/// against the current time, returning the decoded [`KeyPayload`] on success.
///
/// Does not check single-use burn state; the caller must do that against its own
/// `BurnedKey` ledger before consuming the key.
pub fn verify_and_decode_key(
    key_string: &str,
    public_key_pem: &str,
) -> Result<KeyPayload, LifecycleError> {
    let signed_bytes = STANDARD
        .decode(key_string.trim())
        .map_err(|_| LifecycleError::InvalidSignature)?;
    let signed: SignedKey = serde_json::from_slice(&signed_bytes)
        .map_err(|_| LifecycleError::InvalidSignature)?;

    let payload_bytes = serde_json::to_vec(&signed.payload)
        .map_err(|e| LifecycleError::Validation(format!("re-serialize key payload: {e}")))?;
    let signature_bytes = STANDARD
        .decode(&signed.signature)
        .map_err(|_| LifecycleError::InvalidSignature)?;
    verify_signature(public_key_pem, &payload_bytes, &signature_bytes)?;

    if let Some(expire_at) = &signed.payload.expire_at {
        let expires = chrono::DateTime::parse_from_rfc3339(expire_at)
            .map_err(|e| LifecycleError::Validation(format!("malformed expire_at: {e}")))?;
        if expires < chrono::Utc::now() {
            return Err(LifecycleError::Validation("key has expired".into()));
        }
    }

    Ok(signed.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_cube;
    use crate::genkey::generate_key;
    use cuber_types::{PermissionGrant, TenantId};

    #[test]
    fn import_package_accepts_an_export_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cube.db");
        std::fs::write(&db_path, b"fake sqlite bytes").unwrap();
        let tenant = TenantId::new("apx", "vdr", "usr");
        let output = export_cube(&db_path, "cube-1", &tenant, None, &[]).unwrap();

        let imported = import_package(&output.package_bytes).unwrap();
        assert_eq!(imported.manifest.export_uuid, output.manifest.export_uuid);
        assert_eq!(imported.db_bytes, b"fake sqlite bytes");
    }

    #[test]
    fn import_package_rejects_tampered_db_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cube.db");
        std::fs::write(&db_path, b"fake sqlite bytes").unwrap();
        let tenant = TenantId::new("apx", "vdr", "usr");
        let output = export_cube(&db_path, "cube-1", &tenant, None, &[]).unwrap();

        // Flip a byte inside the zip's db entry region; any corruption should fail the
        // hash check rather than silently importing bad data.
        let mut tampered = output.package_bytes.clone();
        if let Some(byte) = tampered.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(import_package(&tampered).is_err());
    }

    #[test]
    fn verify_and_decode_key_accepts_a_freshly_minted_key() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cube.db");
        std::fs::write(&db_path, b"fake sqlite bytes").unwrap();
        let tenant = TenantId::new("apx", "vdr", "usr");
        let output = export_cube(&db_path, "cube-1", &tenant, None, &[]).unwrap();

        let key = generate_key(
            &output.record,
            &output.record.content_hash.clone(),
            &tenant,
            PermissionGrant::default(),
            None,
        )
        .unwrap();

        let payload = verify_and_decode_key(&key, &output.manifest.public_key_pem).unwrap();
        assert_eq!(payload.export_uuid, output.manifest.export_uuid);
    }

    #[test]
    fn verify_and_decode_key_rejects_expired_key() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cube.db");
        std::fs::write(&db_path, b"fake sqlite bytes").unwrap();
        let tenant = TenantId::new("apx", "vdr", "usr");
        let output = export_cube(&db_path, "cube-1", &tenant, None, &[]).unwrap();

        let past = (chrono::Utc::now() - chrono::Duration::days(1)).to_rfc3339();
        let key = generate_key(
            &output.record,
            &output.record.content_hash.clone(),
            &tenant,
            PermissionGrant::default(),
            Some(past),
        )
        .unwrap();

        let err = verify_and_decode_key(&key, &output.manifest.public_key_pem).unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[test]
    fn verify_and_decode_key_rejects_wrong_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cube.db");
        std::fs::write(&db_path, b"fake sqlite bytes").unwrap();
        let tenant = TenantId::new("apx", "vdr", "usr");
        let output_a = export_cube(&db_path, "cube-1", &tenant, None, &[]).unwrap();
        let output_b = export_cube(&db_path, "cube-2", &tenant, None, &[]).unwrap();

        let key = generate_key(
            &output_a.record,
            &output_a.record.content_hash.clone(),
            &tenant,
            PermissionGrant::default(),
            None,
        )
        .unwrap();

        let err = verify_and_decode_key(&key, &output_b.manifest.public_key_pem).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSignature));
    }
}
