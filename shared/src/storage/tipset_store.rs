//! Tipset store trait and in-memory implementation.
//!
//! Provides the `TipsetStore` trait for reading the newest tipset timestamp,
//! the `StoreConnector` trait for establishing a store handle, and in-memory
//! implementations of both for development and testing.

use crate::models::LagSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Errors that can occur during tipset store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or did not answer a ping.
    #[error("Connection error: {0}")]
    Connect(String),

    /// The query itself failed.
    #[error("Query error: {0}")]
    Query(String),

    /// The collection holds no records.
    #[error("No tipset found in store")]
    Empty,

    /// The newest record has no usable timestamp.
    #[error("Failed to decode tipset timestamp: {0}")]
    Decode(String),

    /// The store has already been released.
    #[error("Store has been closed")]
    Closed,

    /// Failed to acquire lock on the store.
    #[error("Failed to acquire lock on tipset store")]
    LockError,
}

/// Read-only access to the newest tipset.
#[async_trait]
pub trait TipsetStore: Send + Sync {
    /// Returns the timestamp of the record with the highest insertion-order key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is empty, the timestamp is missing or
    /// malformed, or the query fails. A default timestamp is never returned.
    async fn newest_sample(&self) -> Result<LagSample, StoreError>;

    /// Releases the underlying connection resources.
    ///
    /// Later calls to [`TipsetStore::newest_sample`] fail with
    /// [`StoreError::Closed`].
    async fn close(&self);
}

/// Establishes a store handle.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Performs a single connection attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connect`] if the store cannot be reached.
    async fn connect(&self) -> Result<Arc<dyn TipsetStore>, StoreError>;
}

#[derive(Debug, Clone)]
struct TipsetRecord {
    id: u64,
    min_timestamp: Option<DateTime<Utc>>,
}

/// In-memory tipset store.
///
/// Records get a monotonically increasing id on insert, mirroring an
/// insertion-ordered collection key.
#[derive(Debug, Default)]
pub struct InMemoryTipsetStore {
    records: RwLock<Vec<TipsetRecord>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemoryTipsetStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Inserts a tipset with the given minimum timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn insert(&self, min_timestamp: DateTime<Utc>) -> Result<(), StoreError> {
        self.push(Some(min_timestamp))
    }

    /// Inserts a tipset that lacks a timestamp field.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn insert_without_timestamp(&self) -> Result<(), StoreError> {
        self.push(None)
    }

    fn push(&self, min_timestamp: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write().map_err(|_| StoreError::LockError)?;
        records.push(TipsetRecord { id, min_timestamp });
        Ok(())
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn count(&self) -> Result<usize, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockError)?;
        Ok(records.len())
    }

    /// Returns how many times [`TipsetStore::close`] was called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Returns how many fetches were attempted.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Returns true once the store has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TipsetStore for InMemoryTipsetStore {
    async fn newest_sample(&self) -> Result<LagSample, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let records = self.records.read().map_err(|_| StoreError::LockError)?;
        let newest = records
            .iter()
            .max_by_key(|record| record.id)
            .ok_or(StoreError::Empty)?;

        newest
            .min_timestamp
            .map(LagSample::new)
            .ok_or_else(|| StoreError::Decode("missing MinTimestamp".to_string()))
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out a shared [`InMemoryTipsetStore`].
///
/// Failures can be scripted to exercise connection retries.
#[derive(Debug)]
pub struct InMemoryConnector {
    store: Arc<InMemoryTipsetStore>,
    failures: Mutex<VecDeque<StoreError>>,
    attempts: AtomicUsize,
}

impl InMemoryConnector {
    /// Creates a connector that always succeeds with `store`.
    #[must_use]
    pub fn new(store: Arc<InMemoryTipsetStore>) -> Self {
        Self {
            store,
            failures: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` connection attempts fail.
    #[must_use]
    pub fn failing(self, count: usize) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.extend(
                (0..count).map(|i| StoreError::Connect(format!("scripted failure {}", i + 1))),
            );
        }
        self
    }

    /// Returns how many connection attempts were made.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn TipsetStore>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failure = self
            .failures
            .lock()
            .map_err(|_| StoreError::LockError)?
            .pop_front();

        match failure {
            Some(err) => Err(err),
            None => Ok(Arc::clone(&self.store) as Arc<dyn TipsetStore>),
        }
    }
}
