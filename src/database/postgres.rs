//! Postgres adapter over sqlx.
//!
//! Rows travel as JSON: reads are wrapped in `row_to_json`, writes go through
//! `jsonb_populate_record` so column types come from the table itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    is_valid_identifier, record_id, DbError, DbPort, Direction, Filter, OrderBy, Record, TxFn,
};
use crate::config::DatabaseConfig;

type Query<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;
type SharedTx = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

#[derive(Clone)]
enum Conn {
    Pool(PgPool),
    Tx { tx: SharedTx, depth: usize },
}

#[derive(Clone)]
pub struct PgDb {
    conn: Conn,
}

impl PgDb {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| DbError::Backend("database url is not configured".into()))?;
        let url = url::Url::parse(raw)
            .map_err(|e| DbError::Backend(format!("invalid database url: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url.as_str())
            .await?;

        info!(
            "Connected to postgres at {}{}",
            url.host_str().unwrap_or("localhost"),
            url.path()
        );
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            conn: Conn::Pool(pool),
        }
    }

    async fn fetch_records(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, DbError> {
        let wrapped = format!("SELECT row_to_json(t) AS row FROM ({sql}) t");
        debug!("{}", wrapped);
        let rows = match &self.conn {
            Conn::Pool(pool) => bind_all(sqlx::query(&wrapped), params).fetch_all(pool).await?,
            Conn::Tx { tx, .. } => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                bind_all(sqlx::query(&wrapped), params)
                    .fetch_all(&mut **tx)
                    .await?
            }
        };

        rows.into_iter()
            .map(|row| match row.try_get::<Value, _>("row")? {
                Value::Object(map) => Ok(map),
                other => Err(DbError::Backend(format!("expected a row object, got {other}"))),
            })
            .collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        debug!("{}", sql);
        let done = match &self.conn {
            Conn::Pool(pool) => bind_all(sqlx::query(sql), params).execute(pool).await,
            Conn::Tx { tx, .. } => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                bind_all(sqlx::query(sql), params).execute(&mut **tx).await
            }
        };
        Ok(done.map_err(map_sqlx)?.rows_affected())
    }

    async fn fetch_one(&self, sql: &Sql) -> Result<Record, DbError> {
        self.fetch_records(&sql.text, &sql.params)
            .await?
            .into_iter()
            .next()
            .ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl DbPort for PgDb {
    async fn find_by_id(&self, table: &str, id: &str) -> Result<Record, DbError> {
        let filter = Filter::new().eq("id", id);
        self.fetch_one(&select_sql(table, &filter, &OrderBy::default(), Some(1))?)
            .await
    }

    async fn find_by(&self, table: &str, filter: &Filter) -> Result<Record, DbError> {
        self.fetch_one(&select_sql(table, filter, &OrderBy::default(), Some(1))?)
            .await
    }

    async fn first(&self, table: &str, filter: &Filter) -> Result<Record, DbError> {
        self.fetch_one(&select_sql(table, filter, &OrderBy::asc("id"), Some(1))?)
            .await
    }

    async fn find_all(
        &self,
        table: &str,
        order: &OrderBy,
        filter: &Filter,
    ) -> Result<Vec<Record>, DbError> {
        let sql = select_sql(table, filter, order, None)?;
        self.fetch_records(&sql.text, &sql.params).await
    }

    async fn count_by(&self, table: &str, filter: &Filter) -> Result<i64, DbError> {
        let sql = count_sql(table, filter)?;
        let row = self.fetch_one(&sql).await?;
        row.get("count")
            .and_then(Value::as_i64)
            .ok_or_else(|| DbError::Backend("count query returned no count".into()))
    }

    async fn create(&self, table: &str, record: Record) -> Result<(), DbError> {
        let id = record_id(&record)?;
        let sql = insert_sql(table, record, false)?;
        match self.execute(&sql.text, &sql.params).await {
            Err(DbError::Conflict { .. }) => Err(DbError::Conflict {
                table: table.to_string(),
                id,
            }),
            other => other.map(|_| ()),
        }
    }

    async fn save(&self, table: &str, record: Record) -> Result<(), DbError> {
        record_id(&record)?;
        let sql = insert_sql(table, record, true)?;
        self.execute(&sql.text, &sql.params).await?;
        Ok(())
    }

    async fn patch(&self, table: &str, id: &str, changes: Record) -> Result<(), DbError> {
        let sql = update_sql(table, id, changes)?;
        match self.execute(&sql.text, &sql.params).await? {
            0 => Err(DbError::NotFound),
            _ => Ok(()),
        }
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
        self.delete_by(table, &Filter::new().eq("id", id)).await?;
        Ok(())
    }

    async fn delete_by(&self, table: &str, filter: &Filter) -> Result<u64, DbError> {
        let sql = delete_sql(table, filter)?;
        self.execute(&sql.text, &sql.params).await
    }

    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Record>, DbError> {
        self.fetch_records(sql, &params).await
    }

    async fn update_raw(&self, sql: &str, params: Vec<Value>) -> Result<u64, DbError> {
        self.execute(sql, &params).await
    }

    async fn transaction<'a>(&'a self, f: TxFn<'a>) -> Result<(), DbError> {
        match &self.conn {
            Conn::Pool(pool) => {
                let shared: SharedTx = Arc::new(Mutex::new(Some(pool.begin().await?)));
                let scoped = PgDb {
                    conn: Conn::Tx {
                        tx: Arc::clone(&shared),
                        depth: 1,
                    },
                };
                let outcome = f(Arc::new(scoped)).await;

                let tx = shared.lock().await.take().ok_or(DbError::TransactionClosed)?;
                match outcome {
                    Ok(()) => {
                        tx.commit().await?;
                        Ok(())
                    }
                    Err(e) => {
                        tx.rollback().await?;
                        Err(e)
                    }
                }
            }
            Conn::Tx { tx, depth } => {
                let savepoint = format!("sp_{depth}");
                self.execute(&format!("SAVEPOINT {savepoint}"), &[]).await?;
                let scoped = PgDb {
                    conn: Conn::Tx {
                        tx: Arc::clone(tx),
                        depth: depth + 1,
                    },
                };
                match f(Arc::new(scoped)).await {
                    Ok(()) => {
                        self.execute(&format!("RELEASE SAVEPOINT {savepoint}"), &[])
                            .await?;
                        Ok(())
                    }
                    Err(e) => {
                        self.execute(&format!("ROLLBACK TO SAVEPOINT {savepoint}"), &[])
                            .await?;
                        Err(e)
                    }
                }
            }
        }
    }
}

/// SQL text plus positional parameters
#[derive(Debug, Clone, PartialEq)]
struct Sql {
    text: String,
    params: Vec<Value>,
}

fn quote(name: &str) -> Result<String, DbError> {
    if !is_valid_identifier(name) {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

/// Compares through `to_jsonb` so one JSON value matches any column type.
/// The value travels as JSON text and is cast to `jsonb` on the server.
fn where_clause(filter: &Filter, params: &mut Vec<Value>) -> Result<String, DbError> {
    let mut parts = Vec::with_capacity(filter.conditions().len());
    for (field, value) in filter.conditions() {
        let column = quote(field)?;
        if value.is_null() {
            parts.push(format!("{column} IS NULL"));
        } else if field == "id" {
            params.push(Value::String(id_text(value)));
            parts.push(format!("{column}::text = ${}", params.len()));
        } else {
            params.push(Value::String(value.to_string()));
            parts.push(format!("to_jsonb({column}) = ${}::jsonb", params.len()));
        }
    }
    if parts.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn select_sql(
    table: &str,
    filter: &Filter,
    order: &OrderBy,
    limit: Option<u32>,
) -> Result<Sql, DbError> {
    let mut params = Vec::new();
    let mut text = format!("SELECT * FROM {}", quote(table)?);
    text.push_str(&where_clause(filter, &mut params)?);

    if !order.is_empty() {
        let keys = order
            .keys()
            .iter()
            .map(|(field, direction)| {
                let dir = match direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                Ok(format!("{} {dir}", quote(field)?))
            })
            .collect::<Result<Vec<_>, DbError>>()?;
        text.push_str(" ORDER BY ");
        text.push_str(&keys.join(", "));
    }
    if let Some(limit) = limit {
        text.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(Sql { text, params })
}

fn count_sql(table: &str, filter: &Filter) -> Result<Sql, DbError> {
    let mut params = Vec::new();
    let mut text = format!("SELECT COUNT(*) AS count FROM {}", quote(table)?);
    text.push_str(&where_clause(filter, &mut params)?);
    Ok(Sql { text, params })
}

fn insert_sql(table: &str, record: Record, upsert: bool) -> Result<Sql, DbError> {
    let table = quote(table)?;
    let columns = record
        .keys()
        .map(|k| quote(k))
        .collect::<Result<Vec<_>, DbError>>()?;
    let list = columns.join(", ");

    let mut text = format!(
        "INSERT INTO {table} ({list}) SELECT {list} FROM jsonb_populate_record(NULL::{table}, $1)"
    );
    if upsert {
        let assignments = columns
            .iter()
            .filter(|c| c.as_str() != "\"id\"")
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>();
        if assignments.is_empty() {
            text.push_str(" ON CONFLICT (\"id\") DO NOTHING");
        } else {
            text.push_str(" ON CONFLICT (\"id\") DO UPDATE SET ");
            text.push_str(&assignments.join(", "));
        }
    }
    Ok(Sql {
        text,
        params: vec![Value::Object(record)],
    })
}

fn update_sql(table: &str, id: &str, changes: Record) -> Result<Sql, DbError> {
    if changes.is_empty() {
        return Err(DbError::Backend("no columns to update".into()));
    }
    let table = quote(table)?;
    let assignments = changes
        .keys()
        .map(|k| quote(k).map(|c| format!("{c} = r.{c}")))
        .collect::<Result<Vec<_>, DbError>>()?;

    Ok(Sql {
        text: format!(
            "UPDATE {table} SET {} FROM jsonb_populate_record(NULL::{table}, $1) AS r WHERE {table}.\"id\"::text = $2",
            assignments.join(", ")
        ),
        params: vec![Value::Object(changes), Value::String(id.to_string())],
    })
}

fn delete_sql(table: &str, filter: &Filter) -> Result<Sql, DbError> {
    let mut params = Vec::new();
    let mut text = format!("DELETE FROM {}", quote(table)?);
    text.push_str(&where_clause(filter, &mut params)?);
    Ok(Sql { text, params })
}

fn bind_all<'q>(mut q: Query<'q>, params: &'q [Value]) -> Query<'q> {
    for p in params {
        q = bind_value(q, p);
    }
    q
}

fn bind_value<'q>(q: Query<'q>, v: &'q Value) -> Query<'q> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        // JSONB
        Value::Array(_) | Value::Object(_) => q.bind(v),
    }
}

fn map_sqlx(err: sqlx::Error) -> DbError {
    match &err {
        sqlx::Error::RowNotFound => DbError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => DbError::Conflict {
            table: db.table().unwrap_or_default().to_string(),
            id: String::new(),
        },
        _ => DbError::Sqlx(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(quote("users").is_ok());
        assert!(matches!(
            quote("users\"; DROP TABLE x; --"),
            Err(DbError::InvalidIdentifier(_))
        ));
        let filter = Filter::new().eq("name or 1=1", "x");
        assert!(select_sql("users", &filter, &OrderBy::default(), None).is_err());
    }

    #[test]
    fn builds_filtered_ordered_select() {
        let filter = Filter::new().eq("id", "u1").eq("active", true).eq("deleted_at", Value::Null);
        let order = OrderBy::desc("created_at");
        let sql = select_sql("users", &filter, &order, Some(1)).unwrap();
        assert_eq!(
            sql.text,
            "SELECT * FROM \"users\" WHERE \"id\"::text = $1 AND to_jsonb(\"active\") = $2::jsonb \
             AND \"deleted_at\" IS NULL ORDER BY \"created_at\" DESC LIMIT 1"
        );
        assert_eq!(sql.params, vec![json!("u1"), json!("true")]);
    }

    #[test]
    fn builds_count() {
        let sql = count_sql("users", &Filter::new()).unwrap();
        assert_eq!(sql.text, "SELECT COUNT(*) AS count FROM \"users\"");
        assert!(sql.params.is_empty());
    }

    #[test]
    fn builds_insert_and_upsert() {
        let row = record(json!({ "id": "u1", "name": "ada" }));
        let sql = insert_sql("users", row.clone(), false).unwrap();
        assert_eq!(
            sql.text,
            "INSERT INTO \"users\" (\"id\", \"name\") SELECT \"id\", \"name\" \
             FROM jsonb_populate_record(NULL::\"users\", $1)"
        );
        assert_eq!(sql.params, vec![Value::Object(row.clone())]);

        let sql = insert_sql("users", row, true).unwrap();
        assert!(sql.text.ends_with("ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""));
    }

    #[test]
    fn builds_partial_update() {
        let sql = update_sql("users", "u1", record(json!({ "name": "ada" }))).unwrap();
        assert_eq!(
            sql.text,
            "UPDATE \"users\" SET \"name\" = r.\"name\" FROM jsonb_populate_record(NULL::\"users\", $1) \
             AS r WHERE \"users\".\"id\"::text = $2"
        );
        assert_eq!(sql.params[1], json!("u1"));
        assert!(update_sql("users", "u1", Record::new()).is_err());
    }

    #[test]
    fn builds_delete() {
        let sql = delete_sql("users", &Filter::new().eq("role", "guest")).unwrap();
        assert_eq!(sql.text, "DELETE FROM \"users\" WHERE to_jsonb(\"role\") = $1::jsonb");
        assert_eq!(sql.params, vec![json!("\"guest\"")]);
    }

    #[test]
    fn filter_values_are_bound_as_json_text() {
        let filter = Filter::new()
            .eq("title", "groceries")
            .eq("pinned", false)
            .eq("rank", 3)
            .eq("tags", json!(["a"]));
        let sql = count_sql("notes", &filter).unwrap();
        assert_eq!(
            sql.text,
            "SELECT COUNT(*) AS count FROM \"notes\" WHERE to_jsonb(\"title\") = $1::jsonb \
             AND to_jsonb(\"pinned\") = $2::jsonb AND to_jsonb(\"rank\") = $3::jsonb \
             AND to_jsonb(\"tags\") = $4::jsonb"
        );
        assert_eq!(
            sql.params,
            vec![json!("\"groceries\""), json!("false"), json!("3"), json!("[\"a\"]")]
        );
        assert!(sql.params.iter().all(Value::is_string));
    }
}
