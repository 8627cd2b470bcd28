//! Environment-driven service configuration.

use cuber_types::Cube;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one running `CubeService` instance, read once at process start
/// the same way `OpenAiEmbedder::from_env()` reads provider credentials.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of per-tenant Cube files: `{DB_DIR_PATH}/{apx}-{vdr}-{usr}/{uuid}.db`.
    pub db_dir_path: PathBuf,
    /// Symmetric key for chat/embedding API-key storage at rest (AES-256-GCM hex).
    pub crypto_secret_key: String,
    /// How long an open Cube handle may sit idle before the sweeper closes it.
    pub storage_idle_timeout: Duration,
    /// Admission gate: a Cube operation that would consume disk is refused below this.
    pub min_free_disk_mb: u64,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            db_dir_path: std::env::var("DB_DIR_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./cubes")),
            crypto_secret_key: std::env::var("CUBER_CRYPTO_SECRET_KEY").unwrap_or_default(),
            storage_idle_timeout: Duration::from_secs(
                std::env::var("CUBER_STORAGE_IDLE_TIMEOUT_MINUTES")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(30)
                    * 60,
            ),
            min_free_disk_mb: std::env::var("MIN_FREE_DISK")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(500),
        }
    }
}

impl ServiceConfig {
    /// Storage file path for `cube`: `{DB_DIR_PATH}/{apx}-{vdr}-{usr}/{uuid}.db`.
    pub fn cube_path(&self, cube: &Cube) -> PathBuf {
        self.db_dir_path
            .join(cube.tenant.path_segment())
            .join(format!("{}.db", cube.uuid))
    }
}
