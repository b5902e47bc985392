//! Key/value entity (database row mapping).

use sqlx::FromRow;

/// Database row mapping for the kv_store table.
#[derive(Debug, Clone, FromRow)]
pub struct KvEntryEntity {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}
