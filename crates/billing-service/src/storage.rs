//! Document storage for projects, deployments and releases
//!
//! Records are flat JSON objects. A `null` field and a missing field are the
//! same thing: stores drop nulls on write, and set-once fields count as
//! unset while they are null.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub type Document = Map<String, Value>;

/// Applies `(op, field, value)` triples from ARGV to the hash at KEYS[1] in a
/// single step. Returns 0 without writing when the hash does not exist.
static UPDATE_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
for i = 1, #ARGV, 3 do
  local op, field, value = ARGV[i], ARGV[i + 1], ARGV[i + 2]
  if op == 'set' then
    redis.call('HSET', KEYS[1], field, value)
  elseif op == 'del' then
    redis.call('HDEL', KEYS[1], field)
  elseif op == 'setnx' then
    redis.call('HSETNX', KEYS[1], field, value)
  elseif op == 'incr' then
    redis.call('HINCRBY', KEYS[1], field, value)
  end
end
return 1
"#,
    )
});

/// Partial update applied to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPatch {
    /// Overwrite; a `null` value removes the field
    pub set: Vec<(String, Value)>,
    /// Write only if the field is currently unset
    pub set_once: Vec<(String, Value)>,
    /// Add to an integer field (missing counts as 0)
    pub increment: Vec<(String, i64)>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.push((field.to_string(), value.into()));
        self
    }

    pub fn set_once(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set_once.push((field.to_string(), value.into()));
        self
    }

    pub fn increment(mut self, field: &str, by: i64) -> Self {
        self.increment.push((field.to_string(), by));
        self
    }
}

/// Equality filters plus optional ordering and limit.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(field.to_string());
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    /// Filter, sort and truncate an unordered set of documents.
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();
        if let Some(field) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                if self.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Timestamps compare chronologically, numbers numerically, the rest as text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Current time in the format every record uses.
pub fn now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn without_nulls(doc: Document) -> Document {
    doc.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

/// Collection-oriented document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a whole document.
    async fn put(&self, collection: &str, id: &str, doc: Document) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Apply a partial update. Fails if the document does not exist.
    async fn update(&self, collection: &str, id: &str, patch: FieldPatch) -> Result<()>;

    async fn find_by(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;
}

/// Redis-backed store: one hash per document (`{collection}:{id}`) holding
/// JSON-encoded field values, plus an id set per collection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn doc_key(collection: &str, id: &str) -> String {
        format!("{}:{}", collection, id)
    }

    fn ids_key(collection: &str) -> String {
        format!("{}:ids", collection)
    }

    fn encode(value: &Value) -> Result<String> {
        serde_json::to_string(value).context("Failed to encode field")
    }

    /// Flatten a patch into the argument triples of [`UPDATE_SCRIPT`].
    fn patch_ops(patch: &FieldPatch) -> Result<Vec<(&'static str, String, String)>> {
        let mut ops = Vec::new();
        for (field, value) in &patch.set {
            if value.is_null() {
                ops.push(("del", field.clone(), String::new()));
            } else {
                ops.push(("set", field.clone(), Self::encode(value)?));
            }
        }
        for (field, value) in &patch.set_once {
            if !value.is_null() {
                ops.push(("setnx", field.clone(), Self::encode(value)?));
            }
        }
        for (field, by) in &patch.increment {
            ops.push(("incr", field.clone(), by.to_string()));
        }
        Ok(ops)
    }

    fn decode(raw: HashMap<String, String>) -> Result<Option<Document>> {
        if raw.is_empty() {
            return Ok(None);
        }
        let mut doc = Document::new();
        for (field, encoded) in raw {
            let value = serde_json::from_str(&encoded)
                .with_context(|| format!("Failed to decode field {}", field))?;
            doc.insert(field, value);
        }
        Ok(Some(doc))
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn put(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        let key = Self::doc_key(collection, id);
        let fields = without_nulls(doc)
            .iter()
            .map(|(k, v)| Ok((k.clone(), Self::encode(v)?)))
            .collect::<Result<Vec<(String, String)>>>()?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(&key)
            .hset_multiple(&key, &fields)
            .sadd(Self::ids_key(collection), id)
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!("Stored {}", key);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(Self::doc_key(collection, id)).await?;
        Self::decode(raw)
    }

    async fn update(&self, collection: &str, id: &str, patch: FieldPatch) -> Result<()> {
        let key = Self::doc_key(collection, id);
        let mut conn = self.conn.clone();

        let mut invocation = UPDATE_SCRIPT.key(&key);
        for (op, field, value) in Self::patch_ops(&patch)? {
            invocation.arg(op).arg(field).arg(value);
        }
        let applied: i64 = invocation.invoke_async(&mut conn).await?;
        if applied == 0 {
            anyhow::bail!("Document not found: {}", key);
        }

        debug!("Updated {}", key);
        Ok(())
    }

    async fn find_by(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(Self::ids_key(collection)).await?;

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get(collection, &id).await? {
                docs.push(doc);
            }
        }
        Ok(query.apply(docs))
    }
}

/// In-process store with the same semantics as [`RedisStore`].
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), without_nulls(doc));
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn update(&self, collection: &str, id: &str, patch: FieldPatch) -> Result<()> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .with_context(|| format!("Document not found: {}:{}", collection, id))?;

        for (field, value) in patch.set {
            if value.is_null() {
                doc.remove(&field);
            } else {
                doc.insert(field, value);
            }
        }
        for (field, value) in patch.set_once {
            let unset = doc.get(&field).map_or(true, Value::is_null);
            if unset && !value.is_null() {
                doc.insert(field, value);
            }
        }
        for (field, by) in patch.increment {
            let current = doc.get(&field).and_then(Value::as_i64).unwrap_or(0);
            doc.insert(field, Value::from(current + by));
        }
        Ok(())
    }

    async fn find_by(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let docs = collections
            .get(collection)
            .map(|c| c.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(query.apply(docs))
    }
}
