//! Storage traits and implementations.
//!
//! This module provides the read-only view of the tipset collection the
//! monitor samples. The `TipsetStore` trait defines the single query the
//! monitor needs, allowing different implementations (in-memory,
//! MongoDB-backed).

pub mod mongo;
pub mod tipset_store;

pub use mongo::{MongoConnector, MongoTipsetStore, COLLECTION_NAME, DATABASE_NAME, TIMESTAMP_FIELD};
pub use tipset_store::{
    InMemoryConnector, InMemoryTipsetStore, StoreConnector, StoreError, TipsetStore,
};
