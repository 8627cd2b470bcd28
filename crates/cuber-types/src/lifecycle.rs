//! Cube lifecycle types: Export/GenKey/Import/ReKey records, burned keys, audit events.

use serde::{Deserialize, Serialize};

/// A snapshot of a Cube packaged for transport; retains the signing private key so later
/// GenKey calls against the same export can be verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub source_cube_uuid: String,
    pub export_uuid: String,
    pub content_hash: String,
    /// PEM-encoded RSA private key, retained server-side only.
    pub private_key_pem: String,
    pub tenant: crate::TenantId,
    pub created_at: String,
}

/// Manifest embedded alongside the database file inside an export zip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub export_uuid: String,
    #[serde(default)]
    pub ancestor_uuid: Option<String>,
    pub tenant: crate::TenantId,
    pub created_at_ms: i64,
    pub public_key_pem: String,
    /// Ancestor lineage plus this export's uuid appended.
    pub lineage: Vec<String>,
    pub content_hash: String,
}

/// Which operation a single-use key was minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnType {
    Import,
    Rekey,
}

/// Single-use credential. `key_id` must be globally unique across all time: once burned
/// it can never be consumed again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnedKey {
    pub id: String,
    pub key_id: String,
    pub consumer: crate::TenantId,
    pub target_cube_uuid: String,
    pub burn_type: BurnType,
    pub created_at: String,
}

/// The opaque payload signed and base64-encoded into a GenKey key string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPayload {
    pub export_uuid: String,
    pub permissions: crate::PermissionGrant,
    #[serde(default)]
    pub expire_at: Option<String>,
    pub key_id: String,
}

/// Kind of auditable event recorded against a Cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Absorb,
    Query,
    Memify,
    Export,
    GenKey,
    Import,
    Rekey,
    Delete,
}

/// One audit event (for governance and debugging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub kind: AuditEventKind,
    pub cube_uuid: String,
    pub tenant: crate::TenantId,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// Options for listing audit events (filter + pagination).
#[derive(Debug, Clone, Default)]
pub struct AuditListOptions {
    pub cube_uuid: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
