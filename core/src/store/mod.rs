// Store module — durable key/value backends

pub mod backend;

pub use backend::{BackendError, MemoryStorage, SledStorage, StorageBackend};
