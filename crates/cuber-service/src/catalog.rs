//! Cube catalog: the shared bookkeeping store behind the registry — Cube rows,
//! retained Export records, the burned-key ledger, and the audit log. The in-memory
//! implementation here follows the same `HashMap` + `RwLock` pattern used for the
//! graph/vector reference stores, generalized to catalog rows.

use async_trait::async_trait;
use cuber_types::lifecycle::{AuditEvent, AuditListOptions, BurnedKey, ExportRecord};
use cuber_types::{Cube, ServiceError, TenantId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Catalog of everything the Cube Service needs that is not inside a Cube's own
/// storage file: Cube rows themselves, retained Export private keys, the single-use
/// key ledger, and the audit trail. A real deployment backs this with the shared
/// catalog database (out of scope here, interface only); this crate
/// ships the in-memory reference implementation used by its own tests.
#[async_trait]
pub trait CubeCatalog: Send + Sync {
    async fn insert_cube(&self, cube: Cube) -> Result<(), ServiceError>;
    async fn get_cube(&self, uuid: &str) -> Result<Option<Cube>, ServiceError>;
    async fn list_cubes(&self, tenant: &TenantId) -> Result<Vec<Cube>, ServiceError>;
    async fn update_cube(&self, cube: Cube) -> Result<(), ServiceError>;
    async fn delete_cube(&self, uuid: &str) -> Result<(), ServiceError>;

    async fn insert_export_record(&self, record: ExportRecord) -> Result<(), ServiceError>;
    async fn get_export_record(&self, export_uuid: &str) -> Result<Option<ExportRecord>, ServiceError>;

    /// `true` if a `BurnedKey` with this `key_id` has already been consumed.
    async fn is_key_burned(&self, key_id: &str) -> Result<bool, ServiceError>;
    async fn burn_key(&self, burned: BurnedKey) -> Result<(), ServiceError>;

    async fn append_audit(&self, event: AuditEvent) -> Result<(), ServiceError>;
    async fn list_audit(&self, opts: &AuditListOptions) -> Result<Vec<AuditEvent>, ServiceError>;
}

#[derive(Default)]
pub struct InMemoryCubeCatalog {
    cubes: RwLock<HashMap<String, Cube>>,
    exports: RwLock<HashMap<String, ExportRecord>>,
    burned: RwLock<HashMap<String, BurnedKey>>,
    audit: RwLock<Vec<AuditEvent>>,
}

impl InMemoryCubeCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CubeCatalog for InMemoryCubeCatalog {
    async fn insert_cube(&self, cube: Cube) -> Result<(), ServiceError> {
        self.cubes.write().await.insert(cube.uuid.clone(), cube);
        Ok(())
    }

    async fn get_cube(&self, uuid: &str) -> Result<Option<Cube>, ServiceError> {
        Ok(self.cubes.read().await.get(uuid).cloned())
    }

    async fn list_cubes(&self, tenant: &TenantId) -> Result<Vec<Cube>, ServiceError> {
        Ok(self
            .cubes
            .read()
            .await
            .values()
            .filter(|c| &c.tenant == tenant)
            .cloned()
            .collect())
    }

    async fn update_cube(&self, cube: Cube) -> Result<(), ServiceError> {
        self.cubes.write().await.insert(cube.uuid.clone(), cube);
        Ok(())
    }

    async fn delete_cube(&self, uuid: &str) -> Result<(), ServiceError> {
        self.cubes.write().await.remove(uuid);
        Ok(())
    }

    async fn insert_export_record(&self, record: ExportRecord) -> Result<(), ServiceError> {
        self.exports
            .write()
            .await
            .insert(record.export_uuid.clone(), record);
        Ok(())
    }

    async fn get_export_record(&self, export_uuid: &str) -> Result<Option<ExportRecord>, ServiceError> {
        Ok(self.exports.read().await.get(export_uuid).cloned())
    }

    async fn is_key_burned(&self, key_id: &str) -> Result<bool, ServiceError> {
        Ok(self.burned.read().await.contains_key(key_id))
    }

    async fn burn_key(&self, burned: BurnedKey) -> Result<(), ServiceError> {
        let mut guard = self.burned.write().await;
        if guard.contains_key(&burned.key_id) {
            return Err(ServiceError::Authorization(format!(
                "key {} has already been burned",
                burned.key_id
            )));
        }
        guard.insert(burned.key_id.clone(), burned);
        Ok(())
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<(), ServiceError> {
        self.audit.write().await.push(event);
        Ok(())
    }

    async fn list_audit(&self, opts: &AuditListOptions) -> Result<Vec<AuditEvent>, ServiceError> {
        let events = self.audit.read().await;
        let mut matched: Vec<AuditEvent> = events
            .iter()
            .filter(|e| {
                opts.cube_uuid.as_deref().map_or(true, |u| e.cube_uuid == u)
                    && opts.since.as_deref().map_or(true, |s| e.timestamp.as_str() >= s)
            })
            .cloned()
            .collect();
        if let Some(offset) = opts.offset {
            matched = matched.into_iter().skip(offset as usize).collect();
        }
        if let Some(limit) = opts.limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuber_types::{EmbeddingDescriptor, PermissionGrant};

    fn cube(uuid: &str, tenant: TenantId) -> Cube {
        Cube {
            id: 1,
            uuid: uuid.to_string(),
            tenant,
            name: "test".into(),
            description: None,
            expire_at: None,
            permissions: PermissionGrant::default(),
            lineage: Vec::new(),
            source_export_uuid: None,
            embedding: EmbeddingDescriptor {
                provider_family: "openai".into(),
                model: "text-embedding-3-small".into(),
                dimension: 1536,
                base_url: None,
                encrypted_api_key: "enc".into(),
            },
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn list_cubes_scopes_to_tenant() {
        let catalog = InMemoryCubeCatalog::new();
        let tenant_a = TenantId::new("a", "v", "u");
        let tenant_b = TenantId::new("b", "v", "u");
        catalog.insert_cube(cube("cube-1", tenant_a.clone())).await.unwrap();
        catalog.insert_cube(cube("cube-2", tenant_b)).await.unwrap();

        let found = catalog.list_cubes(&tenant_a).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uuid, "cube-1");
    }

    #[tokio::test]
    async fn burning_the_same_key_twice_fails() {
        let catalog = InMemoryCubeCatalog::new();
        let burned = BurnedKey {
            id: "1".into(),
            key_id: "key-1".into(),
            consumer: TenantId::new("a", "v", "u"),
            target_cube_uuid: "cube-1".into(),
            burn_type: cuber_types::lifecycle::BurnType::Import,
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        catalog.burn_key(burned.clone()).await.unwrap();
        assert!(catalog.burn_key(burned).await.is_err());
    }
}
