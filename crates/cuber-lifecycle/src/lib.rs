//! Cube lifecycle mechanics: Export packaging, GenKey signing, Import/ReKey
//! verification, and at-rest credential encryption.
//!
//! This crate is deliberately storage-agnostic: it operates on database files, byte
//! buffers, and the [`cuber_types::lifecycle`] records, and returns what it produced for
//! the caller to persist. Burn-ledger bookkeeping (`BurnedKey` uniqueness, `Cube`
//! catalog rows, lineage) belongs to whoever owns the catalog — `cuber-service` in this
//! workspace — since this crate has no opinion on where that catalog lives.

mod delete;
mod export;
mod genkey;
mod import;
mod keys;
mod secret;

pub use cuber_types::lifecycle::{
    AuditEvent, AuditEventKind, AuditListOptions, BurnType, BurnedKey, ExportManifest,
    ExportRecord, KeyPayload,
};
pub use cuber_types::LifecycleError;

pub use delete::delete_storage_file;
pub use export::{export_cube, ExportOutput};
pub use genkey::generate_key;
pub use import::{import_package, verify_and_decode_key, ImportedPackage};
pub use keys::{public_key_from_private_pem, sign_payload, verify_signature, RsaKeyPair};
pub use secret::{decrypt_secret, encrypt_secret};
