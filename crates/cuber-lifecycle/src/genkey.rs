//! GenKey: mint a single-use, signed permission grant against an existing Export.

use crate::keys::sign_payload;
use base64::{engine::general_purpose::STANDARD, Engine};
use cuber_types::lifecycle::{ExportRecord, KeyPayload};
use cuber_types::{LifecycleError, PermissionGrant, TenantId};
use serde::{Deserialize, Serialize};

/// Wire format of a GenKey key string: the payload plus its signature, base64-encoded
/// as one opaque unit.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SignedKey {
    pub payload: KeyPayload,
    /// Base64-encoded PKCS#1 v1.5 signature over `payload`'s canonical JSON bytes.
    pub signature: String,
}

/// Produce an opaque key string signed with `record`'s retained private key.
///
/// Preconditions: the uploaded zip's content hash and tenant must match the
/// Export record being referenced.
pub fn generate_key(
    record: &ExportRecord,
    zip_content_hash: &str,
    zip_tenant: &TenantId,
    permissions: PermissionGrant,
    expire_at: Option<String>,
) -> Result<String, LifecycleError> {
    if zip_content_hash != record.content_hash {
        return Err(LifecycleError::Validation(
            "uploaded package content hash does not match the export record".into(),
        ));
    }
    if zip_tenant != &record.tenant {
        return Err(LifecycleError::Authorization(
            "uploaded package tenant does not match the export record".into(),
        ));
    }

    let payload = KeyPayload {
        export_uuid: record.export_uuid.clone(),
        permissions,
        expire_at,
        key_id: uuid::Uuid::new_v4().to_string(),
    };
    let payload_bytes = serde_json::to_vec(&payload)
        .map_err(|e| LifecycleError::Validation(format!("serialize key payload: {e}")))?;
    let signature = sign_payload(&record.private_key_pem, &payload_bytes)?;

    let signed = SignedKey {
        payload,
        signature: STANDARD.encode(signature),
    };
    let signed_bytes = serde_json::to_vec(&signed)
        .map_err(|e| LifecycleError::Validation(format!("serialize signed key: {e}")))?;
    Ok(STANDARD.encode(signed_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RsaKeyPair;

    fn record() -> (ExportRecord, RsaKeyPair) {
        let keypair = RsaKeyPair::generate().unwrap();
        let tenant = TenantId::new("apx", "vdr", "usr");
        let record = ExportRecord {
            id: "rec-1".into(),
            source_cube_uuid: "cube-1".into(),
            export_uuid: "export-1".into(),
            content_hash: "deadbeef".into(),
            private_key_pem: keypair.private_key_pem.clone(),
            tenant: tenant.clone(),
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        (record, keypair)
    }

    #[test]
    fn generate_key_rejects_hash_mismatch() {
        let (record, _) = record();
        let err = generate_key(
            &record,
            "wrong-hash",
            &record.tenant.clone(),
            PermissionGrant::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[test]
    fn generate_key_rejects_tenant_mismatch() {
        let (record, _) = record();
        let other_tenant = TenantId::new("other", "vdr", "usr");
        let err = generate_key(
            &record,
            &record.content_hash.clone(),
            &other_tenant,
            PermissionGrant::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::Authorization(_)));
    }

    #[test]
    fn generate_key_succeeds_when_hash_and_tenant_match() {
        let (record, _) = record();
        let key = generate_key(
            &record,
            &record.content_hash.clone(),
            &record.tenant.clone(),
            PermissionGrant::default(),
            None,
        )
        .unwrap();
        assert!(!key.is_empty());
    }
}
