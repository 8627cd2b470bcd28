//! Cube handle registry: lazily opens a `SqliteStore` + embedder per Cube,
//! keeps it warm across calls, and sweeps handles that have sat idle past the
//! configured timeout. Mutual exclusion between opening and evicting the same Cube is
//! provided by holding the registry's single write lock across both paths.

use crate::config::ServiceConfig;
use cuber_provider::{EmbeddingConfig, ProviderFamily};
use cuber_sqlite::SqliteStore;
use cuber_types::{Cube, Embedder, ServiceError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// One open Cube: its storage engine, its fixed embedder, and the read/write lock that
/// implements the single-writer model (Absorb/Memify/Delete take `write()`,
/// Query/Stats take `read()`).
pub struct CubeHandle {
    pub storage: Arc<SqliteStore>,
    pub embedder: Arc<dyn Embedder>,
    pub lock: RwLock<()>,
    last_used: Mutex<Instant>,
}

impl CubeHandle {
    async fn touch(&self) {
        *self.last_used.lock().await = Instant::now();
    }

    async fn idle_for(&self) -> Duration {
        self.last_used.lock().await.elapsed()
    }
}

/// Parse the opaque `provider_family` string an [`cuber_types::EmbeddingDescriptor`]
/// carries back into a concrete [`ProviderFamily`].
pub fn parse_provider_family(family: &str) -> Result<ProviderFamily, ServiceError> {
    serde_json::from_value(serde_json::Value::String(family.to_string()))
        .map_err(|_| ServiceError::Resource(format!("unknown embedding provider family: {family}")))
}

pub struct CubeRegistry {
    handles: RwLock<HashMap<String, Arc<CubeHandle>>>,
    config: ServiceConfig,
}

impl CubeRegistry {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Fetch the already-open handle for `cube`, or open it: the storage file at
    /// `{DB_DIR_PATH}/{tenant}/{uuid}.db`, and an embedder built from the Cube's fixed
    /// `EmbeddingDescriptor` (its API key decrypted under `CUBER_CRYPTO_SECRET_KEY`).
    pub async fn get_or_open(&self, cube: &Cube) -> Result<Arc<CubeHandle>, ServiceError> {
        if let Some(handle) = self.handles.read().await.get(&cube.uuid) {
            handle.touch().await;
            return Ok(Arc::clone(handle));
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(&cube.uuid) {
            handle.touch().await;
            return Ok(Arc::clone(handle));
        }

        let path = self.config.cube_path(cube);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::Resource(format!("create cube directory: {e}")))?;
        }
        let storage = Arc::new(SqliteStore::open(&path, cube.embedding.dimension)?);

        let api_key = cuber_lifecycle::decrypt_secret(
            &self.config.crypto_secret_key,
            &cube.embedding.encrypted_api_key,
        )
        .map_err(ServiceError::Lifecycle)?;
        let embedder = cuber_provider::build_embedder(EmbeddingConfig {
            family: parse_provider_family(&cube.embedding.provider_family)?,
            model: cube.embedding.model.clone(),
            api_key,
            base_url: cube.embedding.base_url.clone(),
            dimension: cube.embedding.dimension,
        })
        .map_err(ServiceError::Provider)?;

        let handle = Arc::new(CubeHandle {
            storage,
            embedder,
            lock: RwLock::new(()),
            last_used: Mutex::new(Instant::now()),
        });
        handles.insert(cube.uuid.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Remove and drop a Cube's handle, for Delete. Blocks behind the registry
    /// write lock, same as opening, so a concurrent `get_or_open` cannot race it.
    pub async fn close(&self, cube_uuid: &str) {
        self.handles.write().await.remove(cube_uuid);
    }

    /// Close every handle idle longer than `storage_idle_timeout`. Intended to run on a
    /// periodic interval (see [`CubeRegistry::spawn_idle_sweeper`]).
    pub async fn evict_idle(&self) {
        let mut handles = self.handles.write().await;
        let mut stale = Vec::new();
        for (uuid, handle) in handles.iter() {
            if handle.idle_for().await >= self.config.storage_idle_timeout {
                stale.push(uuid.clone());
            }
        }
        for uuid in stale {
            handles.remove(&uuid);
        }
    }

    /// Close every open handle, for service shutdown.
    pub async fn shutdown(&self) {
        self.handles.write().await.clear();
    }
}

/// Spawn the background sweeper that evicts idle Cube handles on a fixed interval.
/// Returns a handle the caller can abort at shutdown.
pub fn spawn_idle_sweeper(registry: Arc<CubeRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.evict_idle().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuber_types::{EmbeddingDescriptor, PermissionGrant, TenantId};

    fn test_cube(dir: &std::path::Path) -> (Cube, ServiceConfig) {
        let config = ServiceConfig {
            db_dir_path: dir.to_path_buf(),
            crypto_secret_key: "0101010101010101010101010101010101010101010101010101010101010101"
                [..64]
                .to_string(),
            storage_idle_timeout: Duration::from_millis(10),
            min_free_disk_mb: 1,
        };
        let encrypted_api_key =
            cuber_lifecycle::encrypt_secret(&config.crypto_secret_key, "sk-test").unwrap();
        let cube = Cube {
            id: 1,
            uuid: "cube-1".into(),
            tenant: TenantId::new("a", "v", "u"),
            name: "t".into(),
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
                encrypted_api_key,
            },
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        (cube, config)
    }

    #[tokio::test]
    async fn opening_the_same_cube_twice_reuses_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (cube, config) = test_cube(dir.path());
        let registry = CubeRegistry::new(config);

        let first = registry.get_or_open(&cube).await.unwrap();
        let second = registry.get_or_open(&cube).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn evict_idle_closes_handles_past_the_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (cube, config) = test_cube(dir.path());
        let registry = CubeRegistry::new(config);

        registry.get_or_open(&cube).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.evict_idle().await;

        assert!(registry.handles.read().await.is_empty());
    }

    #[tokio::test]
    async fn close_removes_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (cube, config) = test_cube(dir.path());
        let registry = CubeRegistry::new(config);

        registry.get_or_open(&cube).await.unwrap();
        registry.close(&cube.uuid).await;
        assert!(registry.handles.read().await.is_empty());
    }
}
