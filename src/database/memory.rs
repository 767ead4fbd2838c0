use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::database::{record_id, DbError, DbPort, Direction, Filter, OrderBy, Record, TxFn};

/// Rows of one table keyed by id, so iteration follows id order
type Table = BTreeMap<String, Record>;
type Tables = HashMap<String, Table>;

/// In-process adapter. Used by tests and by the demo server when no
/// database URL is configured.
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    async fn matching(&self, table: &str, filter: &Filter) -> Vec<Record> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DbPort for MemoryDb {
    async fn find_by_id(&self, table: &str, id: &str) -> Result<Record, DbError> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn find_by(&self, table: &str, filter: &Filter) -> Result<Record, DbError> {
        self.first(table, filter).await
    }

    async fn first(&self, table: &str, filter: &Filter) -> Result<Record, DbError> {
        self.matching(table, filter)
            .await
            .into_iter()
            .next()
            .ok_or(DbError::NotFound)
    }

    async fn find_all(
        &self,
        table: &str,
        order: &OrderBy,
        filter: &Filter,
    ) -> Result<Vec<Record>, DbError> {
        let mut rows = self.matching(table, filter).await;
        rows.sort_by(|a, b| compare_records(a, b, order));
        Ok(rows)
    }

    async fn count_by(&self, table: &str, filter: &Filter) -> Result<i64, DbError> {
        Ok(self.matching(table, filter).await.len() as i64)
    }

    async fn create(&self, table: &str, record: Record) -> Result<(), DbError> {
        let id = record_id(&record)?;
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(&id) {
            return Err(DbError::Conflict {
                table: table.to_string(),
                id,
            });
        }
        rows.insert(id, record);
        Ok(())
    }

    async fn save(&self, table: &str, record: Record) -> Result<(), DbError> {
        let id = record_id(&record)?;
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().insert(id, record);
        Ok(())
    }

    async fn patch(&self, table: &str, id: &str, changes: Record) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or(DbError::NotFound)?;
        row.extend(changes);
        Ok(())
    }

    async fn update_column(
        &self,
        table: &str,
        id: &str,
        column: &str,
        value: Value,
    ) -> Result<(), DbError> {
        let mut changes = Record::new();
        changes.insert(column.to_string(), value);
        self.patch(table, id, changes).await
    }

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn delete_by(&self, table: &str, filter: &Filter) -> Result<u64, DbError> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|_, r| !filter.matches(r));
        Ok((before - rows.len()) as u64)
    }

    async fn query(&self, _sql: &str, _params: Vec<Value>) -> Result<Vec<Record>, DbError> {
        Err(DbError::Unsupported("raw SQL query"))
    }

    async fn update_raw(&self, _sql: &str, _params: Vec<Value>) -> Result<u64, DbError> {
        Err(DbError::Unsupported("raw SQL update"))
    }

    async fn transaction<'a>(&'a self, f: TxFn<'a>) -> Result<(), DbError> {
        let base = self.tables.read().await.clone();
        let staged = MemoryDb {
            tables: Arc::new(RwLock::new(base.clone())),
        };
        let scoped: Arc<dyn DbPort> = Arc::new(staged.clone());

        if let Err(e) = f(scoped).await {
            debug!("memory transaction rolled back: {}", e);
            return Err(e);
        }

        let written = staged.tables.read().await.clone();
        let mut live = self.tables.write().await;
        apply_changes(&mut live, &base, &written);
        Ok(())
    }
}

/// Applies to `live` only the rows that differ between `base` and `written`,
/// so writes made outside the transaction in the meantime survive.
fn apply_changes(live: &mut Tables, base: &Tables, written: &Tables) {
    let empty = Table::new();
    for (name, rows) in written {
        let before = base.get(name).unwrap_or(&empty);
        let target = live.entry(name.clone()).or_default();
        for (id, row) in rows {
            if before.get(id) != Some(row) {
                target.insert(id.clone(), row.clone());
            }
        }
        for id in before.keys().filter(|id| !rows.contains_key(*id)) {
            target.remove(id);
        }
    }
}

fn compare_records(a: &Record, b: &Record, order: &OrderBy) -> Ordering {
    for (field, direction) in order.keys() {
        let ord = compare_values(
            a.get(field).unwrap_or(&Value::Null),
            b.get(field).unwrap_or(&Value::Null),
        );
        let ord = match direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
