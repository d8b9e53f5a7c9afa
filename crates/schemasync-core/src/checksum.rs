//! Description digests and the persisted checksum.
//!
//! The digest is a SHA-256 over the canonical JSON form of every table,
//! sorted by table id. `serde_json` objects are backed by ordered maps, so
//! keys come out sorted without extra work.

use crate::catalog::TableDescription;
use crate::error::Result;
use crate::store::SchemaStore;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Bumped whenever the canonical form changes shape.
pub const DIGEST_VERSION: &str = "schemasync/v1";

/// Key of the only row in `schema_checksum`.
pub const CHECKSUM_ROW_ID: &str = "singleton";

/// The persisted digest of the last applied description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChecksum {
    /// Always [`CHECKSUM_ROW_ID`].
    pub id: String,
    /// Hex-encoded digest.
    pub digest: String,
    /// When the digest was saved.
    pub computed_at: DateTime<Utc>,
}

/// Canonical JSON form of a description: tables sorted by id, each table
/// canonicalized.
pub fn canonical_form(tables: &[TableDescription]) -> Result<serde_json::Value> {
    let mut canonical: Vec<TableDescription> =
        tables.iter().map(TableDescription::canonicalized).collect();
    canonical.sort_by_key(|t| t.id);
    Ok(serde_json::to_value(canonical)?)
}

/// Digest of a full description, as 64 lowercase hex characters.
pub fn digest(tables: &[TableDescription]) -> Result<String> {
    let canonical = canonical_form(tables)?;
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_VERSION.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(&canonical)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Reads and writes the persisted checksum.
pub struct ChecksumTracker<'a> {
    store: &'a dyn SchemaStore,
}

impl<'a> ChecksumTracker<'a> {
    /// Create a tracker over a store.
    pub fn new(store: &'a dyn SchemaStore) -> Self {
        Self { store }
    }

    /// The stored checksum, if any.
    pub async fn stored(&self) -> Result<Option<SchemaChecksum>> {
        self.store.load_checksum().await
    }

    /// Whether `digest` differs from the stored one. No stored row counts
    /// as changed.
    pub async fn has_changed(&self, digest: &str) -> Result<bool> {
        Ok(self
            .stored()
            .await?
            .map_or(true, |stored| stored.digest != digest))
    }

    /// Overwrite the stored checksum.
    ///
    /// Call only after the migration for `digest` has committed.
    pub async fn save(&self, digest: &str) -> Result<SchemaChecksum> {
        let saved = self.store.save_checksum(digest).await?;
        tracing::info!(digest = %saved.digest, "Saved schema checksum");
        Ok(saved)
    }
}
