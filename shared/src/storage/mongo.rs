//! `MongoDB`-backed tipset store.
//!
//! Reads the newest document of the `bell.Tipset` collection, ordered by its
//! `_id`, and projects only the `MinTimestamp` field.

use crate::models::LagSample;
use crate::storage::{StoreConnector, StoreError, TipsetStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Database holding the tipset collection.
pub const DATABASE_NAME: &str = "bell";

/// Collection of processed tipsets.
pub const COLLECTION_NAME: &str = "Tipset";

/// Field carrying the tipset's minimum block timestamp.
pub const TIMESTAMP_FIELD: &str = "MinTimestamp";

const APP_NAME: &str = "bell-monitor";

/// `MongoDB` tipset store.
///
/// Owns the client for the lifetime of the monitor; [`TipsetStore::close`]
/// shuts it down once.
pub struct MongoTipsetStore {
    client: Client,
    collection: Collection<Document>,
    max_time: Duration,
    closed: AtomicBool,
}

impl MongoTipsetStore {
    /// Creates a store on top of a connected client.
    ///
    /// `max_time` is sent as the server-side query time limit.
    #[must_use]
    pub fn new(client: Client, max_time: Duration) -> Self {
        let collection = client
            .database(DATABASE_NAME)
            .collection::<Document>(COLLECTION_NAME);

        Self {
            client,
            collection,
            max_time,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TipsetStore for MongoTipsetStore {
    async fn newest_sample(&self) -> Result<LagSample, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }

        let mut projection = Document::new();
        projection.insert(TIMESTAMP_FIELD, 1);

        let newest = self
            .collection
            .find_one(doc! {})
            .sort(doc! { "_id": -1 })
            .projection(projection)
            .max_time(self.max_time)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
            .ok_or(StoreError::Empty)?;

        decode_sample(&newest)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Shutting down MongoDB client");
        self.client.clone().shutdown().await;
    }
}

/// Extracts the timestamp from a projected tipset document.
///
/// # Errors
///
/// Returns [`StoreError::Decode`] if the field is absent, not a BSON
/// datetime, or outside the representable range.
pub fn decode_sample(document: &Document) -> Result<LagSample, StoreError> {
    let timestamp = document
        .get_datetime(TIMESTAMP_FIELD)
        .map_err(|e| StoreError::Decode(format!("{TIMESTAMP_FIELD}: {e}")))?;

    let millis = timestamp.timestamp_millis();
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(LagSample::new)
        .ok_or_else(|| StoreError::Decode(format!("{TIMESTAMP_FIELD} out of range: {millis}")))
}

/// Connects to `MongoDB` and verifies the server answers a ping.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    uri: String,
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl MongoConnector {
    /// Creates a new connector.
    ///
    /// # Arguments
    ///
    /// * `uri` - `MongoDB` connection string
    /// * `connect_timeout` - Bound on each connection attempt, from URI
    ///   resolution to the initial ping
    /// * `query_timeout` - Server-side time limit for tipset queries
    #[must_use]
    pub fn new(uri: impl Into<String>, connect_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            uri: uri.into(),
            connect_timeout,
            query_timeout,
        }
    }

    async fn establish(&self) -> Result<Client, StoreError> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);
        options.app_name = Some(APP_NAME.to_string());

        let client =
            Client::with_options(options).map_err(|e| StoreError::Connect(e.to_string()))?;
        let pending = PendingClient::new(client);

        pending
            .client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        Ok(pending.release())
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    /// Parses the URI, builds the client and pings the server, all within
    /// the connect timeout.
    async fn connect(&self) -> Result<Arc<dyn TipsetStore>, StoreError> {
        let client = tokio::time::timeout(self.connect_timeout, self.establish())
            .await
            .map_err(|_| {
                StoreError::Connect(format!(
                    "connection attempt timed out after {:?}",
                    self.connect_timeout
                ))
            })??;

        tracing::info!(
            database = DATABASE_NAME,
            collection = COLLECTION_NAME,
            "Connected to MongoDB"
        );

        Ok(Arc::new(MongoTipsetStore::new(client, self.query_timeout)))
    }
}

/// Client of an attempt that has not succeeded yet.
///
/// Dropped while armed (failed ping, timeout, or a cancelled attempt), it
/// shuts the client down on the current runtime.
struct PendingClient {
    client: Client,
    armed: bool,
}

impl PendingClient {
    fn new(client: Client) -> Self {
        Self {
            client,
            armed: true,
        }
    }

    fn release(mut self) -> Client {
        self.armed = false;
        self.client.clone()
    }
}

impl Drop for PendingClient {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.client.clone();
                handle.spawn(async move {
                    client.shutdown().await;
                    tracing::debug!("Released MongoDB client of abandoned connection attempt");
                });
            }
            Err(_) => tracing::warn!("No runtime to shut down abandoned MongoDB client"),
        }
    }
}
