//! Storage-facing contract.
//!
//! A [`DbPort`] moves JSON records in and out of named tables. Adapters decide
//! how; the [`Repository`] on top of it gives each entity type a typed view.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod repository;

pub use memory::MemoryDb;
pub use postgres::PgDb;
pub use repository::Repository;

/// One stored row, column name to JSON value
pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum DbError {
    /// Backend-agnostic "no matching record"
    #[error("record not found")]
    NotFound,

    #[error("record '{id}' already exists in '{table}'")]
    Conflict { table: String, id: String },

    #[error("unknown field '{field}' for '{table}'")]
    UnknownField { table: String, field: String },

    #[error("field '{0}' cannot be changed")]
    ReadOnlyField(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("record is missing its id")]
    MissingId,

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("transaction is no longer active")]
    TransactionClosed,

    /// The transaction callback failed; everything it wrote was rolled back
    #[error("transaction rolled back: {0}")]
    RolledBack(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound)
    }
}

/// Conjunction of equality conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| record.get(field).unwrap_or(&Value::Null) == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Sort keys, parsed from `"name"`, `"name desc"` or `"a asc, b desc"`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy {
    keys: Vec<(String, Direction)>,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            keys: vec![(field.into(), Direction::Asc)],
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            keys: vec![(field.into(), Direction::Desc)],
        }
    }

    pub fn then(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.keys.push((field.into(), direction));
        self
    }

    pub fn parse(text: &str) -> Result<Self, DbError> {
        let mut keys = Vec::new();
        for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut words = part.split_whitespace();
            let field = words
                .next()
                .ok_or_else(|| DbError::InvalidIdentifier(part.to_string()))?;
            let direction = match words.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("asc") => Direction::Asc,
                Some("desc") => Direction::Desc,
                Some(_) => return Err(DbError::InvalidIdentifier(part.to_string())),
            };
            if words.next().is_some() {
                return Err(DbError::InvalidIdentifier(part.to_string()));
            }
            keys.push((field.to_string(), direction));
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[(String, Direction)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Callback run inside a transaction against the transaction-scoped port.
/// `Ok` commits, `Err` rolls back.
pub type TxFn<'a> =
    Box<dyn FnOnce(Arc<dyn DbPort>) -> BoxFuture<'a, Result<(), DbError>> + Send + 'a>;

/// Persistence primitives every storage adapter provides
#[async_trait]
pub trait DbPort: Send + Sync {
    async fn find_by_id(&self, table: &str, id: &str) -> Result<Record, DbError>;

    /// Any record matching `filter`, `NotFound` when none does
    async fn find_by(&self, table: &str, filter: &Filter) -> Result<Record, DbError>;

    /// First match ordered by id
    async fn first(&self, table: &str, filter: &Filter) -> Result<Record, DbError>;

    async fn find_all(
        &self,
        table: &str,
        order: &OrderBy,
        filter: &Filter,
    ) -> Result<Vec<Record>, DbError>;

    async fn count_by(&self, table: &str, filter: &Filter) -> Result<i64, DbError>;

    async fn create(&self, table: &str, record: Record) -> Result<(), DbError>;

    /// Replaces every column of the record, inserting it when absent
    async fn save(&self, table: &str, record: Record) -> Result<(), DbError>;

    /// Updates only the named columns of one record
    async fn patch(&self, table: &str, id: &str, changes: Record) -> Result<(), DbError>;

    async fn update_column(
        &self,
        table: &str,
        id: &str,
        column: &str,
        value: Value,
    ) -> Result<(), DbError>;

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), DbError>;

    async fn delete_by(&self, table: &str, filter: &Filter) -> Result<u64, DbError>;

    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Record>, DbError>;

    /// Returns the number of affected rows
    async fn update_raw(&self, sql: &str, params: Vec<Value>) -> Result<u64, DbError>;

    async fn transaction<'a>(&'a self, f: TxFn<'a>) -> Result<(), DbError>;
}

/// Explicit schema declaration for a persisted type
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: &'static str;

    /// Persisted field names, `id` included
    const FIELDS: &'static [&'static str];

    fn id(&self) -> &str;

    fn has_field(name: &str) -> bool {
        Self::FIELDS.contains(&name)
    }
}

/// Serializes an entity into a record, requiring a non-empty id
pub fn to_record<T: Entity>(entity: &T) -> Result<Record, DbError> {
    if entity.id().is_empty() {
        return Err(DbError::MissingId);
    }
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        _ => Err(DbError::Backend(format!(
            "entity for '{}' did not serialize to an object",
            T::TABLE
        ))),
    }
}

pub fn from_record<T: Entity>(record: Record) -> Result<T, DbError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

pub(crate) fn record_id(record: &Record) -> Result<String, DbError> {
    match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(DbError::MissingId),
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
