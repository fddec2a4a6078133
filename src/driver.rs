//! Driver seam.
//!
//! Handlers talk to MongoDB through the `MongoBackend` trait and connections are
//! opened through `Connector`. `DriverConnector` is the production pair backed by
//! the official `mongodb` crate; tests substitute in-memory stubs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{
    AggregateOptions, ClientOptions, CountOptions, Credential, FindOneOptions, FindOptions,
    IndexOptions, ServerAddress, Tls, TlsOptions, UpdateOptions,
};
use mongodb::{Client, Collection, IndexModel};

use crate::connection::ConnectionDescriptor;
use crate::error::Result;

/// Application name reported to the server.
const APP_NAME: &str = "mongodb-mcp";

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Database name
    pub database: String,
    /// Collection name
    pub collection: String,
}

impl Namespace {
    /// Create a namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Parameters for a `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Match filter
    pub filter: Document,
    /// Field projection
    pub projection: Option<Document>,
    /// Sort specification
    pub sort: Option<Document>,
    /// Maximum documents returned
    pub limit: i64,
    /// Documents skipped
    pub skip: u64,
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter
    pub matched_count: u64,
    /// Documents actually changed
    pub modified_count: u64,
    /// Identifier of an upserted document
    pub upserted_id: Option<Bson>,
}

/// Index as reported by `listIndexes`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Index name
    pub name: String,
    /// Key specification
    pub keys: Document,
    /// Whether the index enforces uniqueness
    pub unique: bool,
}

/// Index to create.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Ordered key specification
    pub keys: Document,
    /// Explicit name, or the server default
    pub name: Option<String>,
    /// Uniqueness constraint
    pub unique: bool,
}

/// Operations the tool handlers need from a live MongoDB connection.
#[async_trait]
pub trait MongoBackend: Send + Sync {
    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Run a database command.
    async fn run_command(&self, database: &str, command: Document) -> Result<Document>;

    /// Names of every database on the server.
    async fn list_database_names(&self) -> Result<Vec<String>>;

    /// Drop a database.
    async fn drop_database(&self, database: &str) -> Result<()>;

    /// Names of every collection in a database.
    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>>;

    /// Create a collection.
    async fn create_collection(&self, ns: &Namespace) -> Result<()>;

    /// Drop a collection. Dropping a missing collection is a no-op.
    async fn drop_collection(&self, ns: &Namespace) -> Result<()>;

    /// Rename a collection within its database.
    async fn rename_collection(&self, ns: &Namespace, new_name: &str, drop_target: bool) -> Result<()>;

    /// Count documents matching a filter.
    async fn count_documents(&self, ns: &Namespace, filter: Document) -> Result<u64>;

    /// Run a pipeline, materialising at most `max_results` documents.
    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        max_results: usize,
    ) -> Result<Vec<Document>>;

    /// Find documents.
    async fn find(&self, ns: &Namespace, query: FindQuery) -> Result<Vec<Document>>;

    /// Find the first matching document.
    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>>;

    /// Insert a document, returning its identifier.
    async fn insert_one(&self, ns: &Namespace, document: Document) -> Result<Bson>;

    /// Update one or many documents.
    async fn update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        many: bool,
        upsert: bool,
    ) -> Result<UpdateOutcome>;

    /// Delete one or many documents, returning the number removed.
    async fn delete(&self, ns: &Namespace, filter: Document, many: bool) -> Result<u64>;

    /// Indexes on a collection.
    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexInfo>>;

    /// Create an index, returning its name.
    async fn create_index(&self, ns: &Namespace, spec: IndexSpec) -> Result<String>;

    /// Drop an index by exact name.
    async fn drop_index(&self, ns: &Namespace, name: &str) -> Result<()>;
}

/// Opens backend handles from connection descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish and verify a connection.
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn MongoBackend>>;
}

/// Connector backed by the official `mongodb` driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn MongoBackend>> {
        let client = Client::with_options(client_options(descriptor))?;
        client.database("admin").run_command(doc! { "ping": 1 }).await?;
        tracing::debug!(host = %descriptor.host, port = descriptor.port, "MongoDB ping succeeded");
        Ok(Arc::new(MongoDriver {
            client,
            max_time: descriptor.query_timeout(),
        }))
    }
}

/// Build driver options from a descriptor.
fn client_options(descriptor: &ConnectionDescriptor) -> ClientOptions {
    let connect_timeout = Duration::from_millis(descriptor.connect_timeout_ms);

    let mut options = ClientOptions::default();
    options.hosts = vec![ServerAddress::Tcp {
        host: descriptor.host.clone(),
        port: Some(descriptor.port),
    }];
    options.app_name = Some(APP_NAME.to_string());
    options.max_pool_size = Some(descriptor.max_pool_size);
    options.connect_timeout = Some(connect_timeout);
    options.server_selection_timeout = Some(connect_timeout);
    options.default_database = descriptor.database.clone();

    if let (Some(username), Some(password)) = (&descriptor.username, &descriptor.password) {
        let mut credential = Credential::default();
        credential.username = Some(username.clone());
        credential.password = Some(password.clone());
        credential.source = Some(descriptor.auth_source.clone());
        options.credential = Some(credential);
    }

    if descriptor.tls {
        let mut tls = TlsOptions::default();
        tls.allow_invalid_certificates = Some(descriptor.tls_allow_invalid_certificates);
        options.tls = Some(Tls::Enabled(tls));
    }

    options
}

/// Options for a `find` bounded by the server-side time limit.
fn find_options(query: &FindQuery, max_time: Duration) -> FindOptions {
    let mut options = FindOptions::default();
    options.projection = query.projection.clone();
    options.sort = query.sort.clone();
    options.limit = Some(query.limit);
    options.skip = Some(query.skip);
    options.max_time = Some(max_time);
    options
}

/// `MongoBackend` over a `mongodb::Client`.
///
/// Reads send `maxTimeMS` so the server aborts them at the query deadline and
/// the failure surfaces as `MaxTimeMSExpired`. Writes carry no time limit and
/// always run to completion.
pub struct MongoDriver {
    client: Client,
    max_time: Duration,
}

impl MongoDriver {
    fn collection(&self, ns: &Namespace) -> Collection<Document> {
        self.client.database(&ns.database).collection(&ns.collection)
    }
}

#[async_trait]
impl MongoBackend for MongoDriver {
    async fn ping(&self) -> Result<()> {
        self.client.database("admin").run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        Ok(self.client.database(database).run_command(command).await?)
    }

    async fn list_database_names(&self) -> Result<Vec<String>> {
        Ok(self.client.list_database_names().await?)
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.client.database(database).drop().await?;
        Ok(())
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.client.database(database).list_collection_names().await?)
    }

    async fn create_collection(&self, ns: &Namespace) -> Result<()> {
        self.client
            .database(&ns.database)
            .create_collection(&ns.collection)
            .await?;
        Ok(())
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<()> {
        self.collection(ns).drop().await?;
        Ok(())
    }

    async fn rename_collection(&self, ns: &Namespace, new_name: &str, drop_target: bool) -> Result<()> {
        let command = doc! {
            "renameCollection": ns.to_string(),
            "to": format!("{}.{}", ns.database, new_name),
            "dropTarget": drop_target,
        };
        self.client.database("admin").run_command(command).await?;
        Ok(())
    }

    async fn count_documents(&self, ns: &Namespace, filter: Document) -> Result<u64> {
        let mut options = CountOptions::default();
        options.max_time = Some(self.max_time);
        Ok(self
            .collection(ns)
            .count_documents(filter)
            .with_options(options)
            .await?)
    }

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        max_results: usize,
    ) -> Result<Vec<Document>> {
        let mut options = AggregateOptions::default();
        options.max_time = Some(self.max_time);
        let mut cursor = self
            .collection(ns)
            .aggregate(pipeline)
            .with_options(options)
            .await?;
        let mut results = Vec::new();
        while results.len() < max_results && cursor.advance().await? {
            results.push(cursor.deserialize_current()?);
        }
        Ok(results)
    }

    async fn find(&self, ns: &Namespace, query: FindQuery) -> Result<Vec<Document>> {
        let options = find_options(&query, self.max_time);
        let mut cursor = self.collection(ns).find(query.filter).with_options(options).await?;
        let mut results = Vec::new();
        while cursor.advance().await? {
            results.push(cursor.deserialize_current()?);
        }
        Ok(results)
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>> {
        let mut options = FindOneOptions::default();
        options.projection = projection;
        options.max_time = Some(self.max_time);
        Ok(self.collection(ns).find_one(filter).with_options(options).await?)
    }

    async fn insert_one(&self, ns: &Namespace, document: Document) -> Result<Bson> {
        let result = self.collection(ns).insert_one(document).await?;
        Ok(result.inserted_id)
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        many: bool,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let mut options = UpdateOptions::default();
        options.upsert = Some(upsert);

        let collection = self.collection(ns);
        let result = if many {
            collection.update_many(filter, update).with_options(options).await?
        } else {
            collection.update_one(filter, update).with_options(options).await?
        };
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete(&self, ns: &Namespace, filter: Document, many: bool) -> Result<u64> {
        let collection = self.collection(ns);
        let result = if many {
            collection.delete_many(filter).await?
        } else {
            collection.delete_one(filter).await?
        };
        Ok(result.deleted_count)
    }

    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexInfo>> {
        let mut cursor = self.collection(ns).list_indexes().await?;
        let mut indexes = Vec::new();
        while cursor.advance().await? {
            let model: IndexModel = cursor.deserialize_current()?;
            let options = model.options.unwrap_or_default();
            indexes.push(IndexInfo {
                name: options.name.unwrap_or_default(),
                keys: model.keys,
                unique: options.unique.unwrap_or(false),
            });
        }
        Ok(indexes)
    }

    async fn create_index(&self, ns: &Namespace, spec: IndexSpec) -> Result<String> {
        let mut options = IndexOptions::default();
        options.name = spec.name;
        options.unique = Some(spec.unique);

        let model = IndexModel::builder().keys(spec.keys).options(options).build();
        let result = self.collection(ns).create_index(model).await?;
        Ok(result.index_name)
    }

    async fn drop_index(&self, ns: &Namespace, name: &str) -> Result<()> {
        self.collection(ns).drop_index(name).await?;
        Ok(())
    }
}
