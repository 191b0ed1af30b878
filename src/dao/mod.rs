/// Remote document store adapters.
pub mod cloud_store;
/// Keyed on-device persistence.
pub mod kv;
/// Storage error taxonomy.
pub mod storage;
