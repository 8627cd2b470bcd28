//! Export: snapshot a Cube's database file into a signed, self-describing
//! `.cube` zip package.

use crate::keys::RsaKeyPair;
use cuber_types::lifecycle::{ExportManifest, ExportRecord};
use cuber_types::{LifecycleError, TenantId};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Everything produced by one Export call: the server-retained record (carries the
/// private key) and the package bytes handed back to the caller.
pub struct ExportOutput {
    pub record: ExportRecord,
    pub manifest: ExportManifest,
    pub package_bytes: Vec<u8>,
}

/// Snapshot the database file at `db_path`, sign it, and package it into a zip
/// containing `{uuid}.db`, `manifest.json`, `hash.txt`, `public_key.pem`.
///
/// `ancestor_lineage` is the exporting Cube's own lineage chain (empty for a root
/// Cube); the manifest's lineage is that chain with this export's uuid appended.
pub fn export_cube(
    db_path: impl AsRef<Path>,
    source_cube_uuid: &str,
    tenant: &TenantId,
    ancestor_uuid: Option<String>,
    ancestor_lineage: &[String],
) -> Result<ExportOutput, LifecycleError> {
    let db_bytes = std::fs::read(db_path.as_ref())?;

    let mut hasher = Sha256::new();
    hasher.update(&db_bytes);
    let content_hash = hex::encode(hasher.finalize());

    let export_uuid = uuid::Uuid::new_v4().to_string();
    let keypair = RsaKeyPair::generate()?;
    let created_at = chrono::Utc::now();

    let mut lineage: Vec<String> = ancestor_lineage.to_vec();
    lineage.push(export_uuid.clone());

    let manifest = ExportManifest {
        export_uuid: export_uuid.clone(),
        ancestor_uuid,
        tenant: tenant.clone(),
        created_at_ms: created_at.timestamp_millis(),
        public_key_pem: keypair.public_key_pem.clone(),
        lineage,
        content_hash: content_hash.clone(),
    };

    let record = ExportRecord {
        id: uuid::Uuid::new_v4().to_string(),
        source_cube_uuid: source_cube_uuid.to_string(),
        export_uuid: export_uuid.clone(),
        content_hash: content_hash.clone(),
        private_key_pem: keypair.private_key_pem,
        tenant: tenant.clone(),
        created_at: created_at.to_rfc3339(),
    };

    let package_bytes = package_export(&db_bytes, &export_uuid, &manifest, &content_hash)?;

    Ok(ExportOutput {
        record,
        manifest,
        package_bytes,
    })
}

fn package_export(
    db_bytes: &[u8],
    export_uuid: &str,
    manifest: &ExportManifest,
    content_hash: &str,
) -> Result<Vec<u8>, LifecycleError> {
    let manifest_json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| LifecycleError::Validation(format!("serialize manifest: {e}")))?;

    let buffer = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(buffer);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file(format!("{export_uuid}.db"), options)
        .map_err(|e| LifecycleError::Crypto(format!("zip: {e}")))?;
    zip.write_all(db_bytes)
        .map_err(|e| LifecycleError::Crypto(format!("zip write: {e}")))?;

    zip.start_file("manifest.json", options)
        .map_err(|e| LifecycleError::Crypto(format!("zip: {e}")))?;
    zip.write_all(&manifest_json)
        .map_err(|e| LifecycleError::Crypto(format!("zip write: {e}")))?;

    zip.start_file("hash.txt", options)
        .map_err(|e| LifecycleError::Crypto(format!("zip: {e}")))?;
    zip.write_all(content_hash.as_bytes())
        .map_err(|e| LifecycleError::Crypto(format!("zip write: {e}")))?;

    zip.start_file("public_key.pem", options)
        .map_err(|e| LifecycleError::Crypto(format!("zip: {e}")))?;
    zip.write_all(manifest.public_key_pem.as_bytes())
        .map_err(|e| LifecycleError::Crypto(format!("zip write: {e}")))?;

    let cursor = zip
        .finish()
        .map_err(|e| LifecycleError::Crypto(format!("zip finish: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_produces_a_package_with_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cube.db");
        std::fs::write(&db_path, b"fake sqlite bytes").unwrap();

        let tenant = TenantId::new("apx", "vdr", "usr");
        let output = export_cube(&db_path, "cube-uuid-1", &tenant, None, &[]).unwrap();

        assert_eq!(output.manifest.lineage, vec![output.manifest.export_uuid.clone()]);
        assert_eq!(output.record.content_hash, output.manifest.content_hash);
        assert!(!output.package_bytes.is_empty());

        let mut archive =
            zip::ZipArchive::new(Cursor::new(output.package_bytes.clone())).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&format!("{}.db", output.manifest.export_uuid)));
        assert!(names.contains(&"manifest.json".to_string()));
        assert!(names.contains(&"hash.txt".to_string()));
        assert!(names.contains(&"public_key.pem".to_string()));
    }

    #[test]
    fn export_appends_to_ancestor_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cube.db");
        std::fs::write(&db_path, b"fake sqlite bytes").unwrap();
        let tenant = TenantId::new("apx", "vdr", "usr");

        let output = export_cube(
            &db_path,
            "cube-uuid-2",
            &tenant,
            Some("ancestor-export".to_string()),
            &["root-export".to_string()],
        )
        .unwrap();

        assert_eq!(
            output.manifest.lineage,
            vec!["root-export".to_string(), output.manifest.export_uuid.clone()]
        );
    }
}
