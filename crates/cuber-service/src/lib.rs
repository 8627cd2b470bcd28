//! Cube Service: the permission gate every public Cube operation passes through.
//!
//! `CubeService` ties together the [`CubeRegistry`] (lazily-opened storage/embedder per
//! Cube), the [`CubeCatalog`] (Cube rows, retained Export records, the burn ledger, the
//! audit log), [`cuber_lifecycle`]'s Export/GenKey/Import/ReKey/Delete mechanics, and
//! `cuber-cube`'s Absorb/Query/Memify engines. Every method here follows the same
//! shape: fetch the Cube, verify tenant ownership, check the relevant limit, invoke the
//! business logic, and persist a decremented limit iff the call actually consumed one.

mod admission;
mod catalog;
mod config;
mod registry;

pub use catalog::{CubeCatalog, InMemoryCubeCatalog};
pub use config::ServiceConfig;
pub use registry::{parse_provider_family, spawn_idle_sweeper, CubeHandle, CubeRegistry};

use admission::check_disk_space;
use async_trait::async_trait;
use chrono::Utc;
use cuber_cube::{
    run_phase_b, AbsorbEngine, AbsorbError, AbsorbOutcome, AbsorbRequest, MemifyConfig,
    MemifyOutcome, QueryEngine,
};
use cuber_lifecycle::{
    delete_storage_file, encrypt_secret, export_cube, generate_key, import_package,
    public_key_from_private_pem, verify_and_decode_key, AuditEvent, AuditEventKind, BurnType,
    BurnedKey, ExportOutput,
};
use cuber_pipeline::CancellationToken;
use cuber_provider::{build_embedder, build_chat_provider, ChatConfig, EmbeddingConfig, ProviderFamily};
use cuber_types::{
    consume_limit, ChatProvider, Cube, Embedder, EmbeddingDescriptor, GraphStorage, NodeType,
    PermissionGrant, QueryError, QueryRequest, QueryResponse, ServiceError, TenantId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

fn provider_family_to_string(family: ProviderFamily) -> String {
    serde_json::to_value(family)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Builds the concrete embedder for a Cube's [`EmbeddingConfig`], live-probed via
/// `verify` once at Create/Import time. Production code wires this to
/// [`cuber_provider::build_embedder`]; tests inject a stub so `create_cube`/`import`
/// never touch the network.
#[async_trait]
pub trait EmbedderFactory: Send + Sync {
    async fn build(&self, config: EmbeddingConfig) -> Result<Arc<dyn Embedder>, ServiceError>;
}

/// Default [`EmbedderFactory`], backed by the real provider façade.
pub struct LiveEmbedderFactory;

#[async_trait]
impl EmbedderFactory for LiveEmbedderFactory {
    async fn build(&self, config: EmbeddingConfig) -> Result<Arc<dyn Embedder>, ServiceError> {
        build_embedder(config).map_err(ServiceError::Provider)
    }
}

/// Resolves an opaque `chat_model_id` to a concrete chat provider for one Absorb/Query/
/// Memify call. The shared catalog that would back a real chat-model registry is out
/// of scope for this crate tree; callers supply their own resolution.
#[async_trait]
pub trait ChatModelResolver: Send + Sync {
    async fn resolve(&self, chat_model_id: &str) -> Result<Arc<dyn ChatProvider>, ServiceError>;
}

/// A [`ChatModelResolver`] backed by a fixed table of chat configurations, each built
/// into a live provider once at construction via [`cuber_provider::build_chat_provider`].
pub struct StaticChatModelResolver {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
}

impl StaticChatModelResolver {
    pub fn new(models: impl IntoIterator<Item = (String, ChatConfig)>) -> Self {
        let providers = models
            .into_iter()
            .map(|(id, config)| (id, build_chat_provider(config)))
            .collect();
        Self { providers }
    }
}

#[async_trait]
impl ChatModelResolver for StaticChatModelResolver {
    async fn resolve(&self, chat_model_id: &str) -> Result<Arc<dyn ChatProvider>, ServiceError> {
        self.providers
            .get(chat_model_id)
            .cloned()
            .ok_or_else(|| ServiceError::Resource(format!("unknown chat model id: {chat_model_id}")))
    }
}

fn map_absorb_error(err: AbsorbError) -> ServiceError {
    match err {
        AbsorbError::Storage(e) => ServiceError::Storage(e),
        AbsorbError::Pipeline(e) => ServiceError::Pipeline(e),
        AbsorbError::Memify(e) => ServiceError::Memify(e),
    }
}

/// Parameters for [`CubeService::create_cube`].
pub struct CreateCubeRequest {
    pub tenant: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub expire_at: Option<String>,
    pub permissions: PermissionGrant,
    pub embedding_family: ProviderFamily,
    pub embedding_model: String,
    pub embedding_api_key: String,
    pub embedding_base_url: Option<String>,
    pub embedding_dimension: u32,
}

/// Embedding configuration a tenant supplies on Import, since an export package never
/// carries provider credentials.
pub struct ImportEmbeddingConfig {
    pub family: ProviderFamily,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub dimension: u32,
}

/// Node-type counts and lineage for the Stats operation, gated on `allow_stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CubeStats {
    pub lineage: Vec<String>,
    pub node_counts: HashMap<&'static str, usize>,
}

const ALL_NODE_TYPES: [NodeType; 6] = [
    NodeType::Entity,
    NodeType::Summary,
    NodeType::Rule,
    NodeType::Unknown,
    NodeType::Capability,
    NodeType::DocumentChunk,
];

/// The Cube Service: the single entry point a host process (HTTP surface, CLI, ...)
/// drives every Cube operation through.
pub struct CubeService {
    catalog: Arc<dyn CubeCatalog>,
    registry: Arc<CubeRegistry>,
    config: ServiceConfig,
    chat_models: Arc<dyn ChatModelResolver>,
    embedder_factory: Arc<dyn EmbedderFactory>,
    next_cube_id: AtomicI64,
}

impl CubeService {
    pub fn new(
        config: ServiceConfig,
        catalog: Arc<dyn CubeCatalog>,
        chat_models: Arc<dyn ChatModelResolver>,
        embedder_factory: Arc<dyn EmbedderFactory>,
    ) -> Self {
        let registry = Arc::new(CubeRegistry::new(config.clone()));
        Self {
            catalog,
            registry,
            config,
            chat_models,
            embedder_factory,
            next_cube_id: AtomicI64::new(1),
        }
    }

    /// The shared registry, for wiring up [`spawn_idle_sweeper`] at process start.
    pub fn registry(&self) -> Arc<CubeRegistry> {
        Arc::clone(&self.registry)
    }

    async fn require_cube(&self, cube_uuid: &str, tenant: &TenantId) -> Result<Cube, ServiceError> {
        let cube = self
            .catalog
            .get_cube(cube_uuid)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cube {cube_uuid}")))?;
        if &cube.tenant != tenant {
            return Err(ServiceError::Authorization(
                "tenant does not own this cube".to_string(),
            ));
        }
        if let Some(expire_at) = &cube.expire_at {
            if let Ok(expires) = chrono::DateTime::parse_from_rfc3339(expire_at) {
                if expires < Utc::now() {
                    return Err(ServiceError::Authorization("cube has expired".to_string()));
                }
            }
        }
        Ok(cube)
    }

    async fn audit(
        &self,
        kind: AuditEventKind,
        cube_uuid: &str,
        tenant: &TenantId,
        detail: Option<String>,
    ) {
        let event = AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            kind,
            cube_uuid: cube_uuid.to_string(),
            tenant: tenant.clone(),
            timestamp: Utc::now().to_rfc3339(),
            detail,
            outcome: Some("ok".to_string()),
        };
        let _ = self.catalog.append_audit(event).await;
    }

    /// Create: validate and live-probe the embedding config, encrypt its API
    /// key at rest, and register the new Cube.
    pub async fn create_cube(&self, req: CreateCubeRequest) -> Result<Cube, ServiceError> {
        let embedding_config = EmbeddingConfig {
            family: req.embedding_family,
            model: req.embedding_model.clone(),
            api_key: req.embedding_api_key.clone(),
            base_url: req.embedding_base_url.clone(),
            dimension: req.embedding_dimension,
        };
        let embedder = self.embedder_factory.build(embedding_config).await?;
        embedder.verify().await.map_err(ServiceError::Provider)?;

        let encrypted_api_key = encrypt_secret(&self.config.crypto_secret_key, &req.embedding_api_key)
            .map_err(ServiceError::Lifecycle)?;

        let cube = Cube {
            id: self.next_cube_id.fetch_add(1, Ordering::SeqCst),
            uuid: Uuid::new_v4().to_string(),
            tenant: req.tenant,
            name: req.name,
            description: req.description,
            expire_at: req.expire_at,
            permissions: req.permissions,
            lineage: Vec::new(),
            source_export_uuid: None,
            embedding: EmbeddingDescriptor {
                provider_family: provider_family_to_string(req.embedding_family),
                model: req.embedding_model,
                dimension: req.embedding_dimension,
                base_url: req.embedding_base_url,
                encrypted_api_key,
            },
            created_at: Utc::now().to_rfc3339(),
        };

        check_disk_space(&self.config.cube_path(&cube), self.config.min_free_disk_mb)?;
        self.catalog.insert_cube(cube.clone()).await?;
        // Opens (and creates) the storage file now, so a failure surfaces at Create
        // rather than on the first Absorb/Query.
        self.registry.get_or_open(&cube).await?;
        Ok(cube)
    }

    /// Absorb: ingest one document into `cube_uuid`, gated on `absorb_limit`.
    pub async fn absorb(
        &self,
        cube_uuid: &str,
        tenant: &TenantId,
        chat_model_id: &str,
        req: AbsorbRequest,
        cancel: CancellationToken,
    ) -> Result<AbsorbOutcome, ServiceError> {
        let cube = self.require_cube(cube_uuid, tenant).await?;
        if cube.permissions.absorb_limit < 0 {
            return Err(ServiceError::Permission("absorb_limit is exhausted".to_string()));
        }
        check_disk_space(&self.config.cube_path(&cube), self.config.min_free_disk_mb)?;

        let handle = self.registry.get_or_open(&cube).await?;
        let _write_guard = handle.lock.write().await;

        let chat = self.chat_models.resolve(chat_model_id).await?;
        let engine = AbsorbEngine::new(Arc::clone(&handle.storage), Arc::clone(&handle.embedder), chat);
        let outcome = engine.absorb(req, cancel).await.map_err(map_absorb_error)?;

        if !outcome.duplicate {
            if let Some(consumption) = consume_limit(cube.permissions.absorb_limit) {
                let mut updated = cube.clone();
                updated.permissions.absorb_limit = consumption.to_store;
                self.catalog.update_cube(updated).await?;
            }
        }

        self.audit(AuditEventKind::Absorb, cube_uuid, tenant, outcome.document_id.clone())
            .await;
        Ok(outcome)
    }

    /// Query: run one retrieval strategy against `cube_uuid`, gated on
    /// `query_limit` and `allowed_query_types`.
    pub async fn query(
        &self,
        cube_uuid: &str,
        tenant: &TenantId,
        req: QueryRequest,
    ) -> Result<QueryResponse, ServiceError> {
        let cube = self.require_cube(cube_uuid, tenant).await?;
        let handle = self.registry.get_or_open(&cube).await?;
        let _read_guard = handle.lock.read().await;

        let chat = self.chat_models.resolve(&req.chat_model_id).await?;
        let engine = QueryEngine::new(Arc::clone(&handle.storage), Arc::clone(&handle.embedder), chat);
        let response = engine.execute(&req, &cube.permissions).await?;

        if let Some(consumption) = consume_limit(cube.permissions.query_limit) {
            let mut updated = cube.clone();
            updated.permissions.query_limit = consumption.to_store;
            self.catalog.update_cube(updated).await?;
        }

        self.audit(AuditEventKind::Query, cube_uuid, tenant, None).await;
        Ok(response)
    }

    /// Streaming variant of [`CubeService::query`]: the answer is forwarded
    /// one word at a time. The returned stream's limit/usage accounting is persisted in
    /// the background as soon as the underlying `execute` call resolves, independent of
    /// how much of the stream the caller actually drains.
    ///
    /// Unlike [`CubeService::query`], this does not hold the Cube's read lock for the
    /// stream's full lifetime: the handle is looked up once up front, and each
    /// storage/embedder call beneath it serializes on its own connection lock. A
    /// concurrent Delete can therefore race a still-draining stream; see DESIGN.md.
    pub async fn query_streaming(
        &self,
        cube_uuid: &str,
        tenant: &TenantId,
        req: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<ReceiverStream<Result<String, QueryError>>, ServiceError> {
        let cube = self.require_cube(cube_uuid, tenant).await?;
        let handle = self.registry.get_or_open(&cube).await?;

        let chat = self.chat_models.resolve(&req.chat_model_id).await?;
        let engine = QueryEngine::new(Arc::clone(&handle.storage), Arc::clone(&handle.embedder), chat);

        let (report_tx, report_rx) = tokio::sync::oneshot::channel();
        let stream = engine.execute_streaming(req, cube.permissions.clone(), cancel, Some(report_tx));

        let catalog = Arc::clone(&self.catalog);
        let cube_for_persist = cube.clone();
        tokio::spawn(async move {
            if let Ok(Ok(_response)) = report_rx.await {
                if let Some(consumption) = consume_limit(cube_for_persist.permissions.query_limit) {
                    let mut updated = cube_for_persist;
                    updated.permissions.query_limit = consumption.to_store;
                    let _ = catalog.update_cube(updated).await;
                }
            }
        });

        self.audit(AuditEventKind::Query, cube_uuid, tenant, Some("streaming".to_string()))
            .await;
        Ok(stream)
    }

    /// Memify Phase B: refine `memory_group`'s edges against `rules`, gated on
    /// `memify_limit` and `memify_max_epochs`.
    #[allow(clippy::too_many_arguments)]
    pub async fn memify(
        &self,
        cube_uuid: &str,
        tenant: &TenantId,
        memory_group: &str,
        chat_model_id: &str,
        target_node_ids: Option<Vec<String>>,
        rules: Vec<String>,
        config: MemifyConfig,
    ) -> Result<MemifyOutcome, ServiceError> {
        let cube = self.require_cube(cube_uuid, tenant).await?;
        if cube.permissions.memify_limit < 0 {
            return Err(ServiceError::Permission("memify_limit is exhausted".to_string()));
        }
        if let Some(max_epochs) = cube.permissions.memify_max_epochs {
            let epochs = config.recursive_depth.saturating_add(1);
            if epochs > max_epochs {
                return Err(ServiceError::Permission(format!(
                    "memify would run {epochs} epochs, exceeding the grant's {max_epochs}-epoch cap"
                )));
            }
        }
        check_disk_space(&self.config.cube_path(&cube), self.config.min_free_disk_mb)?;

        let handle = self.registry.get_or_open(&cube).await?;
        let _write_guard = handle.lock.write().await;

        let chat = self.chat_models.resolve(chat_model_id).await?;
        let outcome = run_phase_b(
            handle.storage.as_ref(),
            chat.as_ref(),
            memory_group,
            target_node_ids.as_deref(),
            &rules,
            &config,
        )
        .await
        .map_err(ServiceError::Memify)?;

        if let Some(consumption) = consume_limit(cube.permissions.memify_limit) {
            let mut updated = cube.clone();
            updated.permissions.memify_limit = consumption.to_store;
            self.catalog.update_cube(updated).await?;
        }

        self.audit(AuditEventKind::Memify, cube_uuid, tenant, None).await;
        Ok(outcome)
    }

    /// Export: snapshot `cube_uuid` into a signed `.cube` package, gated on
    /// `export_limit`.
    pub async fn export(&self, cube_uuid: &str, tenant: &TenantId) -> Result<ExportOutput, ServiceError> {
        let cube = self.require_cube(cube_uuid, tenant).await?;
        if cube.permissions.export_limit < 0 {
            return Err(ServiceError::Permission("export_limit is exhausted".to_string()));
        }

        let handle = self.registry.get_or_open(&cube).await?;
        let _read_guard = handle.lock.read().await;

        let path = self.config.cube_path(&cube);
        let output = export_cube(&path, &cube.uuid, &cube.tenant, cube.source_export_uuid.clone(), &cube.lineage)
            .map_err(ServiceError::Lifecycle)?;
        self.catalog.insert_export_record(output.record.clone()).await?;

        if let Some(consumption) = consume_limit(cube.permissions.export_limit) {
            let mut updated = cube.clone();
            updated.permissions.export_limit = consumption.to_store;
            self.catalog.update_cube(updated).await?;
        }

        self.audit(AuditEventKind::Export, cube_uuid, tenant, Some(output.manifest.export_uuid.clone()))
            .await;
        Ok(output)
    }

    /// GenKey: mint a single-use key against a retained Export, gated on the
    /// *source* Cube's `genkey_limit` (the Cube the export was taken from, not any
    /// future imported Cube).
    pub async fn genkey(
        &self,
        export_uuid: &str,
        tenant: &TenantId,
        zip_content_hash: &str,
        permissions: PermissionGrant,
        expire_at: Option<String>,
    ) -> Result<String, ServiceError> {
        let record = self
            .catalog
            .get_export_record(export_uuid)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("export {export_uuid}")))?;
        let source_cube = self.require_cube(&record.source_cube_uuid, tenant).await?;
        if source_cube.permissions.genkey_limit < 0 {
            return Err(ServiceError::Permission("genkey_limit is exhausted".to_string()));
        }

        let key = generate_key(&record, zip_content_hash, tenant, permissions, expire_at)
            .map_err(ServiceError::Lifecycle)?;

        if let Some(consumption) = consume_limit(source_cube.permissions.genkey_limit) {
            let mut updated = source_cube.clone();
            updated.permissions.genkey_limit = consumption.to_store;
            self.catalog.update_cube(updated).await?;
        }

        self.audit(AuditEventKind::GenKey, &record.source_cube_uuid, tenant, Some(export_uuid.to_string()))
            .await;
        Ok(key)
    }

    /// Import: verify a key string against an uploaded `.cube` package, mint a
    /// new Cube with a fresh identity, and burn the key. Not gated on any limit field —
    /// single-use burn-key consumption is the only admission control. Leaves no
    /// partial state on failure: the key is burned (atomically, via the catalog's
    /// check-and-insert) only after the package is verified and admission passes, and
    /// the new storage file is removed if any step after the write fails.
    pub async fn import(
        &self,
        tenant: &TenantId,
        package_bytes: &[u8],
        key_string: &str,
        embedding: ImportEmbeddingConfig,
    ) -> Result<Cube, ServiceError> {
        let imported = import_package(package_bytes).map_err(ServiceError::Lifecycle)?;
        let payload = verify_and_decode_key(key_string, &imported.manifest.public_key_pem)
            .map_err(ServiceError::Lifecycle)?;
        if payload.export_uuid != imported.manifest.export_uuid {
            return Err(ServiceError::Authorization(
                "key was not minted for this package".to_string(),
            ));
        }
        if imported.manifest.tenant != *tenant {
            return Err(ServiceError::Authorization(
                "package tenant does not match the importing tenant".to_string(),
            ));
        }
        if self.catalog.is_key_burned(&payload.key_id).await? {
            return Err(ServiceError::Authorization("key has already been used".to_string()));
        }

        let embedding_config = EmbeddingConfig {
            family: embedding.family,
            model: embedding.model.clone(),
            api_key: embedding.api_key.clone(),
            base_url: embedding.base_url.clone(),
            dimension: embedding.dimension,
        };
        let embedder = self.embedder_factory.build(embedding_config).await?;
        embedder.verify().await.map_err(ServiceError::Provider)?;
        let encrypted_api_key = encrypt_secret(&self.config.crypto_secret_key, &embedding.api_key)
            .map_err(ServiceError::Lifecycle)?;

        let new_uuid = Uuid::new_v4().to_string();
        let cube = Cube {
            id: self.next_cube_id.fetch_add(1, Ordering::SeqCst),
            uuid: new_uuid.clone(),
            tenant: tenant.clone(),
            name: format!("imported-{}", imported.manifest.export_uuid),
            description: None,
            expire_at: payload.expire_at.clone(),
            permissions: payload.permissions.clone(),
            lineage: imported.manifest.lineage.clone(),
            source_export_uuid: Some(imported.manifest.export_uuid.clone()),
            embedding: EmbeddingDescriptor {
                provider_family: provider_family_to_string(embedding.family),
                model: embedding.model,
                dimension: embedding.dimension,
                base_url: embedding.base_url,
                encrypted_api_key,
            },
            created_at: Utc::now().to_rfc3339(),
        };

        let path = self.config.cube_path(&cube);
        check_disk_space(&path, self.config.min_free_disk_mb)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::Resource(format!("create cube directory: {e}")))?;
        }
        std::fs::write(&path, &imported.db_bytes)
            .map_err(|e| ServiceError::Resource(format!("write imported cube file: {e}")))?;

        let burn = BurnedKey {
            id: Uuid::new_v4().to_string(),
            key_id: payload.key_id.clone(),
            consumer: tenant.clone(),
            target_cube_uuid: new_uuid.clone(),
            burn_type: BurnType::Import,
            created_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.catalog.burn_key(burn).await {
            let _ = delete_storage_file(&path);
            return Err(e);
        }
        if let Err(e) = self.catalog.insert_cube(cube.clone()).await {
            let _ = delete_storage_file(&path);
            return Err(e);
        }

        self.audit(AuditEventKind::Import, &new_uuid, tenant, Some(imported.manifest.export_uuid))
            .await;
        Ok(cube)
    }

    /// ReKey: replace `cube_uuid`'s permission grant and expiry with a freshly
    /// signed key's payload, verified against the retained Export's re-derived public
    /// key. Gated on the *current* grant's `rekey_limit`; since ReKey replaces the
    /// grant wholesale there is nothing to decrement afterward — the new grant's limits
    /// govern starting with the next operation.
    pub async fn rekey(
        &self,
        cube_uuid: &str,
        tenant: &TenantId,
        key_string: &str,
    ) -> Result<Cube, ServiceError> {
        let mut cube = self.require_cube(cube_uuid, tenant).await?;
        if cube.permissions.rekey_limit < 0 {
            return Err(ServiceError::Permission("rekey_limit is exhausted".to_string()));
        }
        let export_uuid = cube.source_export_uuid.clone().ok_or_else(|| {
            ServiceError::Authorization("cube has no retained export to rekey against".to_string())
        })?;
        let record = self
            .catalog
            .get_export_record(&export_uuid)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("export {export_uuid}")))?;

        let public_key_pem =
            public_key_from_private_pem(&record.private_key_pem).map_err(ServiceError::Lifecycle)?;
        let payload =
            verify_and_decode_key(key_string, &public_key_pem).map_err(ServiceError::Lifecycle)?;
        if payload.export_uuid != export_uuid {
            return Err(ServiceError::Authorization(
                "key was not minted for this cube's export".to_string(),
            ));
        }
        if self.catalog.is_key_burned(&payload.key_id).await? {
            return Err(ServiceError::Authorization("key has already been used".to_string()));
        }

        let burn = BurnedKey {
            id: Uuid::new_v4().to_string(),
            key_id: payload.key_id.clone(),
            consumer: tenant.clone(),
            target_cube_uuid: cube_uuid.to_string(),
            burn_type: BurnType::Rekey,
            created_at: Utc::now().to_rfc3339(),
        };
        self.catalog.burn_key(burn).await?;

        cube.permissions = payload.permissions;
        cube.expire_at = payload.expire_at;
        self.catalog.update_cube(cube.clone()).await?;

        self.audit(AuditEventKind::Rekey, cube_uuid, tenant, None).await;
        Ok(cube)
    }

    /// Delete: close the open handle, remove the storage file, and drop the
    /// catalog row. Irreversible; not gated on any limit field.
    pub async fn delete(&self, cube_uuid: &str, tenant: &TenantId) -> Result<(), ServiceError> {
        let cube = self.require_cube(cube_uuid, tenant).await?;
        self.registry.close(cube_uuid).await;
        delete_storage_file(&self.config.cube_path(&cube)).map_err(ServiceError::Lifecycle)?;
        self.catalog.delete_cube(cube_uuid).await?;
        self.audit(AuditEventKind::Delete, cube_uuid, tenant, None).await;
        Ok(())
    }

    /// Stats: per-node-type counts plus lineage, gated on `allow_stats`.
    pub async fn stats(
        &self,
        cube_uuid: &str,
        tenant: &TenantId,
        memory_group: &str,
    ) -> Result<CubeStats, ServiceError> {
        let cube = self.require_cube(cube_uuid, tenant).await?;
        if !cube.permissions.allow_stats {
            return Err(ServiceError::Permission(
                "stats are not permitted for this grant".to_string(),
            ));
        }

        let handle = self.registry.get_or_open(&cube).await?;
        let _read_guard = handle.lock.read().await;

        let mut node_counts = HashMap::new();
        for node_type in ALL_NODE_TYPES {
            let nodes = handle.storage.get_nodes_by_type(node_type, memory_group).await?;
            node_counts.insert(node_type.as_str(), nodes.len());
        }

        Ok(CubeStats {
            lineage: cube.lineage.clone(),
            node_counts,
        })
    }
}
