//! Entity definitions (database row mappings).

pub mod kv_entry;

pub use kv_entry::KvEntryEntity;
