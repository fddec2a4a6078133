//! In-memory stand-ins for the MongoDB driver.
//!
//! `StubBackend` keeps databases as nested maps and supports the subset of
//! query semantics the tools exercise: equality filters, `$set`/`$inc` updates,
//! inclusion projections, and `$match`/`$limit`/`$collStats` pipelines. Every
//! trait call bumps a counter so tests can assert that no driver call happened.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use serde_json::{Map, Value as JsonValue};

use mongodb_mcp::{
    envelope, ConnectionDescriptor, ConnectionManager, Connector, FindQuery, IndexInfo, IndexSpec,
    McpError, MongoBackend, Namespace, Result, Settings, ToolRegistry, UpdateOutcome,
};

/// Host the stub connector refuses.
pub const UNREACHABLE_HOST: &str = "unreachable.invalid";

#[derive(Default)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

impl CollectionData {
    fn new() -> Self {
        Self {
            docs: Vec::new(),
            indexes: vec![IndexInfo {
                name: "_id_".to_string(),
                keys: doc! { "_id": 1 },
                unique: false,
            }],
        }
    }
}

type Databases = BTreeMap<String, BTreeMap<String, CollectionData>>;

/// In-memory `MongoBackend`.
pub struct StubBackend {
    databases: Mutex<Databases>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    max_time: Mutex<Option<Duration>>,
}

impl StubBackend {
    /// A server holding only the `admin` and `local` system databases.
    pub fn new() -> Self {
        let mut databases = Databases::new();
        databases
            .entry("admin".to_string())
            .or_default()
            .insert("system.version".to_string(), CollectionData::new());
        databases
            .entry("local".to_string())
            .or_default()
            .insert("startup_log".to_string(), CollectionData::new());
        Self {
            databases: Mutex::new(databases),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(None),
            max_time: Mutex::new(None),
        }
    }

    /// Number of trait calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every data call sleep first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Server-side time limit applied to reads, as `maxTimeMS` would.
    pub fn set_max_time(&self, max_time: Duration) {
        *self.max_time.lock().unwrap() = Some(max_time);
    }

    async fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Like `touch`, but a read slower than the time limit is aborted at the
    /// limit with the server's `MaxTimeMSExpired` message.
    async fn touch_read(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        let max_time = *self.max_time.lock().unwrap();
        match (delay, max_time) {
            (Some(delay), Some(limit)) if delay > limit => {
                tokio::time::sleep(limit).await;
                Err(McpError::Timeout("operation exceeded time limit".to_string()))
            }
            (Some(delay), _) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }

    fn with_collection<T>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&mut CollectionData) -> Result<T>,
    ) -> Result<T> {
        let mut databases = self.databases.lock().unwrap();
        let collection = databases
            .get_mut(&ns.database)
            .and_then(|db| db.get_mut(&ns.collection))
            .ok_or_else(|| McpError::NotFound(format!("ns does not exist: {}", ns)))?;
        f(collection)
    }

    fn with_collection_or_create<T>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&mut CollectionData) -> Result<T>,
    ) -> Result<T> {
        let mut databases = self.databases.lock().unwrap();
        let collection = databases
            .entry(ns.database.clone())
            .or_default()
            .entry(ns.collection.clone())
            .or_insert_with(CollectionData::new);
        f(collection)
    }

    fn matching(&self, ns: &Namespace, filter: &Document) -> Vec<Document> {
        let databases = self.databases.lock().unwrap();
        databases
            .get(&ns.database)
            .and_then(|db| db.get(&ns.collection))
            .map(|c| c.docs.iter().filter(|d| matches(d, filter)).cloned().collect())
            .unwrap_or_default()
    }

    fn server_status() -> Document {
        doc! {
            "host": "stub:27017",
            "version": "7.0.0",
            "uptime": 7200.0,
            "connections": { "current": 5, "available": 95 },
            "opcounters": {
                "insert": 10_i64, "query": 20_i64, "update": 5_i64,
                "delete": 1_i64, "getmore": 0_i64, "command": 64_i64
            },
            "mem": { "resident": 128, "virtual": 1024 },
            "network": { "bytesIn": 2_097_152_i64, "bytesOut": 1_048_576_i64, "numRequests": 100_i64 },
            "ok": 1.0,
        }
    }

    fn db_stats(&self, database: &str) -> Document {
        let databases = self.databases.lock().unwrap();
        let (collections, objects, indexes) = databases
            .get(database)
            .map(|db| {
                (
                    db.len() as i64,
                    db.values().map(|c| c.docs.len() as i64).sum::<i64>(),
                    db.values().map(|c| c.indexes.len() as i64).sum::<i64>(),
                )
            })
            .unwrap_or((0, 0, 0));
        let avg_obj_size = if objects > 0 { 100.0 } else { 0.0 };
        doc! {
            "db": database,
            "collections": collections,
            "objects": objects,
            "avgObjSize": avg_obj_size,
            "dataSize": objects * 100,
            "storageSize": 4096 * collections,
            "indexes": indexes,
            "indexSize": 4096 * indexes,
            "totalSize": 4096 * (collections + indexes),
            "ok": 1.0,
        }
    }
}

/// Top-level equality match.
fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

/// Inclusion projection; `_id` is kept unless excluded.
fn project(doc: Document, projection: &Option<Document>) -> Document {
    let Some(projection) = projection else {
        return doc;
    };
    let keep_id = !matches!(projection.get("_id"), Some(Bson::Int32(0)) | Some(Bson::Boolean(false)));
    doc.into_iter()
        .filter(|(k, _)| (k == "_id" && keep_id) || (k != "_id" && projection.contains_key(k)))
        .collect()
}

fn apply_update(doc: &mut Document, update: &Document) -> Result<bool> {
    let before = doc.clone();
    for (op, spec) in update {
        let spec = spec
            .as_document()
            .ok_or_else(|| McpError::Operation(format!("{} requires a document", op)))?;
        for (field, value) in spec {
            match op.as_str() {
                "$set" => {
                    doc.insert(field.clone(), value.clone());
                }
                "$inc" => {
                    let next = match (doc.get(field), value) {
                        (Some(Bson::Int32(a)), Bson::Int32(b)) => Bson::Int32(a + b),
                        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a + b),
                        (Some(Bson::Double(a)), Bson::Double(b)) => Bson::Double(a + b),
                        (None, v) => v.clone(),
                        _ => return Err(McpError::Operation("cannot $inc a non-number".into())),
                    };
                    doc.insert(field.clone(), next);
                }
                other => return Err(McpError::Operation(format!("unsupported operator {}", other))),
            }
        }
    }
    Ok(*doc != before)
}

fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(k, v)| match v {
            Bson::String(s) => format!("{}_{}", k, s),
            other => format!("{}_{}", k, other),
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl MongoBackend for StubBackend {
    async fn ping(&self) -> Result<()> {
        self.touch().await;
        Ok(())
    }

    async fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        self.touch().await;
        let name = command.keys().next().cloned().unwrap_or_default();
        match name.as_str() {
            "serverStatus" => Ok(Self::server_status()),
            "dbStats" => Ok(self.db_stats(database)),
            "validate" => {
                let ns = Namespace::new(database, command.get_str("validate").unwrap_or_default());
                let (records, indexes) =
                    self.with_collection(&ns, |c| Ok((c.docs.len() as i64, c.indexes.len() as i64)))?;
                Ok(doc! {
                    "ns": ns.to_string(),
                    "nrecords": records,
                    "nIndexes": indexes,
                    "valid": true,
                    "warnings": [],
                    "errors": [],
                    "ok": 1.0,
                })
            }
            other => Err(McpError::Operation(format!("no such command: '{}'", other))),
        }
    }

    async fn list_database_names(&self) -> Result<Vec<String>> {
        self.touch().await;
        let databases = self.databases.lock().unwrap();
        Ok(databases
            .iter()
            .filter(|(_, collections)| !collections.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.touch().await;
        self.databases.lock().unwrap().remove(database);
        Ok(())
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        self.touch().await;
        let databases = self.databases.lock().unwrap();
        Ok(databases
            .get(database)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_collection(&self, ns: &Namespace) -> Result<()> {
        self.touch().await;
        let mut databases = self.databases.lock().unwrap();
        let db = databases.entry(ns.database.clone()).or_default();
        if db.contains_key(&ns.collection) {
            return Err(McpError::Operation(format!("Collection {} already exists.", ns)));
        }
        db.insert(ns.collection.clone(), CollectionData::new());
        Ok(())
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<()> {
        self.touch().await;
        let mut databases = self.databases.lock().unwrap();
        if let Some(db) = databases.get_mut(&ns.database) {
            db.remove(&ns.collection);
        }
        Ok(())
    }

    async fn rename_collection(&self, ns: &Namespace, new_name: &str, drop_target: bool) -> Result<()> {
        self.touch().await;
        let mut databases = self.databases.lock().unwrap();
        let db = databases
            .get_mut(&ns.database)
            .ok_or_else(|| McpError::NotFound(format!("ns does not exist: {}", ns)))?;
        if db.contains_key(new_name) && !drop_target {
            return Err(McpError::Operation("target namespace exists".to_string()));
        }
        let data = db
            .remove(&ns.collection)
            .ok_or_else(|| McpError::NotFound(format!("ns does not exist: {}", ns)))?;
        db.insert(new_name.to_string(), data);
        Ok(())
    }

    async fn count_documents(&self, ns: &Namespace, filter: Document) -> Result<u64> {
        self.touch_read().await?;
        Ok(self.matching(ns, &filter).len() as u64)
    }

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        max_results: usize,
    ) -> Result<Vec<Document>> {
        self.touch_read().await?;
        let mut docs = self.matching(ns, &Document::new());
        for stage in &pipeline {
            let (op, spec) = stage
                .iter()
                .next()
                .ok_or_else(|| McpError::Operation("empty stage".to_string()))?;
            match op.as_str() {
                "$match" => {
                    let filter = spec.as_document().cloned().unwrap_or_default();
                    docs.retain(|d| matches(d, &filter));
                }
                "$limit" => {
                    let n = match spec {
                        Bson::Int32(n) => *n as usize,
                        Bson::Int64(n) => *n as usize,
                        _ => return Err(McpError::Operation("$limit must be a number".into())),
                    };
                    docs.truncate(n);
                }
                "$collStats" => {
                    let (count, indexes) = self.with_collection(ns, |c| {
                        Ok((c.docs.len() as i64, c.indexes.iter().map(|i| i.name.clone()).collect::<Vec<_>>()))
                    })?;
                    let avg_obj_size = if count > 0 { 100.0 } else { 0.0 };
                    let total_index_size = 4096 * indexes.len() as i64;
                    let mut sizes = Document::new();
                    for name in &indexes {
                        sizes.insert(name.clone(), 4096_i64);
                    }
                    docs = vec![doc! {
                        "ns": ns.to_string(),
                        "storageStats": {
                            "count": count,
                            "size": count * 100,
                            "avgObjSize": avg_obj_size,
                            "storageSize": 4096_i64,
                            "nindexes": indexes.len() as i64,
                            "totalIndexSize": total_index_size,
                            "indexSizes": sizes,
                        },
                    }];
                }
                other => {
                    return Err(McpError::Operation(format!("Unrecognized pipeline stage name: '{}'", other)))
                }
            }
        }
        docs.truncate(max_results);
        Ok(docs)
    }

    async fn find(&self, ns: &Namespace, query: FindQuery) -> Result<Vec<Document>> {
        self.touch_read().await?;
        let limit = if query.limit > 0 { query.limit as usize } else { usize::MAX };
        Ok(self
            .matching(ns, &query.filter)
            .into_iter()
            .skip(query.skip as usize)
            .take(limit)
            .map(|d| project(d, &query.projection))
            .collect())
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>> {
        self.touch_read().await?;
        Ok(self
            .matching(ns, &filter)
            .into_iter()
            .next()
            .map(|d| project(d, &projection)))
    }

    async fn insert_one(&self, ns: &Namespace, mut document: Document) -> Result<Bson> {
        self.touch().await;
        if !document.contains_key("_id") {
            let mut with_id = doc! { "_id": ObjectId::new() };
            for (k, v) in document {
                with_id.insert(k, v);
            }
            document = with_id;
        }
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.with_collection_or_create(ns, |c| {
            if c.docs.iter().any(|d| d.get("_id") == Some(&id)) {
                return Err(McpError::Operation(format!("E11000 duplicate key error collection: {}", ns)));
            }
            c.docs.push(document);
            Ok(())
        })?;
        Ok(id)
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        many: bool,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        self.touch().await;
        self.with_collection_or_create(ns, |c| {
            let mut matched = 0;
            let mut modified = 0;
            for doc in c.docs.iter_mut().filter(|d| matches(d, &filter)) {
                matched += 1;
                if apply_update(doc, &update)? {
                    modified += 1;
                }
                if !many {
                    break;
                }
            }

            let mut upserted_id = None;
            if matched == 0 && upsert {
                let id = Bson::ObjectId(ObjectId::new());
                let mut doc = doc! { "_id": id.clone() };
                for (k, v) in &filter {
                    doc.insert(k.clone(), v.clone());
                }
                apply_update(&mut doc, &update)?;
                c.docs.push(doc);
                upserted_id = Some(id);
            }

            Ok(UpdateOutcome {
                matched_count: matched,
                modified_count: modified,
                upserted_id,
            })
        })
    }

    async fn delete(&self, ns: &Namespace, filter: Document, many: bool) -> Result<u64> {
        self.touch().await;
        let result = self.with_collection(ns, |c| {
            let before = c.docs.len();
            if many {
                c.docs.retain(|d| !matches(d, &filter));
            } else if let Some(pos) = c.docs.iter().position(|d| matches(d, &filter)) {
                c.docs.remove(pos);
            }
            Ok((before - c.docs.len()) as u64)
        });
        match result {
            Err(McpError::NotFound(_)) => Ok(0),
            other => other,
        }
    }

    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexInfo>> {
        self.touch().await;
        self.with_collection(ns, |c| Ok(c.indexes.clone()))
    }

    async fn create_index(&self, ns: &Namespace, spec: IndexSpec) -> Result<String> {
        self.touch().await;
        let name = spec.name.clone().unwrap_or_else(|| default_index_name(&spec.keys));
        self.with_collection_or_create(ns, |c| {
            if let Some(existing) = c.indexes.iter().find(|i| i.name == name) {
                if existing.keys == spec.keys && existing.unique == spec.unique {
                    return Ok(name.clone());
                }
                return Err(McpError::Operation(format!(
                    "An existing index has the same name as the requested index: {}",
                    name
                )));
            }
            if c.indexes.iter().any(|i| i.keys == spec.keys) {
                return Err(McpError::Operation("Index already exists with a different name".into()));
            }
            c.indexes.push(IndexInfo {
                name: name.clone(),
                keys: spec.keys,
                unique: spec.unique,
            });
            Ok(name.clone())
        })
    }

    async fn drop_index(&self, ns: &Namespace, name: &str) -> Result<()> {
        self.touch().await;
        self.with_collection(ns, |c| {
            let before = c.indexes.len();
            c.indexes.retain(|i| i.name != name);
            if c.indexes.len() == before {
                return Err(McpError::NotFound(format!("index not found with name [{}]", name)));
            }
            Ok(())
        })
    }
}

/// Connector that hands out one shared `StubBackend`.
pub struct StubConnector {
    backend: Arc<StubBackend>,
    connects: AtomicUsize,
}

impl StubConnector {
    pub fn new(backend: Arc<StubBackend>) -> Self {
        Self {
            backend,
            connects: AtomicUsize::new(0),
        }
    }

    /// Connection attempts made so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn MongoBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if descriptor.host == UNREACHABLE_HOST {
            return Err(McpError::Connection(format!(
                "Server selection timeout: No available servers ({}:{})",
                descriptor.host, descriptor.port
            )));
        }
        self.backend.set_max_time(descriptor.query_timeout());
        let backend: Arc<dyn MongoBackend> = self.backend.clone();
        Ok(backend)
    }
}

/// Stub backend, manager and registry wired together.
pub struct Harness {
    pub backend: Arc<StubBackend>,
    pub connector: Arc<StubConnector>,
    pub manager: ConnectionManager,
    pub registry: ToolRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let backend = Arc::new(StubBackend::new());
        let connector = Arc::new(StubConnector::new(backend.clone()));
        let manager = ConnectionManager::new(connector.clone(), settings);
        Self {
            backend,
            connector,
            manager,
            registry: ToolRegistry::new(),
        }
    }

    /// Dispatch a tool call and return its envelope.
    pub async fn dispatch(&self, name: &str, args: JsonValue) -> JsonValue {
        let args_map: Map<String, JsonValue> = match args {
            JsonValue::Object(m) => m,
            _ => Map::new(),
        };
        self.registry.dispatch(&self.manager, name, args_map).await
    }

    /// Dispatch a tool call that must succeed.
    pub async fn call_tool(&self, name: &str, args: JsonValue) -> JsonValue {
        let env = self.dispatch(name, args).await;
        assert!(!envelope::is_error(&env), "Tool {} failed: {}", name, env);
        assert_eq!(env["status"], "success");
        env
    }

    /// Dispatch a tool call that must fail.
    pub async fn call_tool_err(&self, name: &str, args: JsonValue) -> JsonValue {
        let env = self.dispatch(name, args).await;
        assert!(envelope::is_error(&env), "Expected tool {} to fail: {}", name, env);
        env
    }

    /// Configure a connection to the stub server.
    pub async fn connect(&self) -> JsonValue {
        self.call_tool(
            "mongodb_configure_connection",
            serde_json::json!({"host": "localhost", "port": 27017}),
        )
        .await
    }
}
