use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::database::{from_record, to_record, DbError, DbPort, Entity, Filter, OrderBy, Record};
use crate::env::Ctx;

/// Typed view of one table
pub struct Repository<T> {
    db: Arc<dyn DbPort>,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            _phantom: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(db: Arc<dyn DbPort>) -> Self {
        Self {
            db,
            _phantom: PhantomData,
        }
    }

    /// Repository bound to the request environment's port
    pub fn from_ctx(ctx: &Ctx) -> Self {
        Self::new(ctx.env.db())
    }

    /// Underlying port, for raw queries
    pub fn db(&self) -> &Arc<dyn DbPort> {
        &self.db
    }

    /// `None` when no record has this id.
    ///
    /// Unlike every other read, backend failures do not propagate here: they
    /// are logged and reported as `None`, which keeps the `Option` signature
    /// callers of this lookup were written against. Use
    /// [`Repository::try_find_by_id`] when the failure matters.
    pub async fn find_by_id(&self, id: &str) -> Option<T> {
        match self.try_find_by_id(id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("find_by_id on '{}' failed: {}", T::TABLE, e);
                None
            }
        }
    }

    pub async fn try_find_by_id(&self, id: &str) -> Result<Option<T>, DbError> {
        absent_if_not_found(self.db.find_by_id(T::TABLE, id).await)
    }

    /// `Ok(None)` when nothing matches
    pub async fn find_by(&self, filter: &Filter) -> Result<Option<T>, DbError> {
        absent_if_not_found(self.db.find_by(T::TABLE, filter).await)
    }

    /// First match ordered by id, `Ok(None)` when nothing matches
    pub async fn first_by(&self, filter: &Filter) -> Result<Option<T>, DbError> {
        absent_if_not_found(self.db.first(T::TABLE, filter).await)
    }

    pub async fn count_by(&self, filter: &Filter) -> Result<i64, DbError> {
        self.db.count_by(T::TABLE, filter).await
    }

    pub async fn find_all(&self, order: &OrderBy) -> Result<Vec<T>, DbError> {
        self.find_all_by(order, &Filter::new()).await
    }

    pub async fn find_all_by(&self, order: &OrderBy, filter: &Filter) -> Result<Vec<T>, DbError> {
        self.db
            .find_all(T::TABLE, order, filter)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    pub async fn create(&self, entity: &T) -> Result<(), DbError> {
        self.db.create(T::TABLE, to_record(entity)?).await
    }

    /// Replaces every persisted field
    pub async fn update(&self, entity: &T) -> Result<(), DbError> {
        self.db.save(T::TABLE, to_record(entity)?).await
    }

    /// Writes only `changes` and applies them to `entity` on success
    pub async fn patch(&self, entity: &mut T, changes: Record) -> Result<(), DbError> {
        for field in changes.keys() {
            self.check_writable(field)?;
        }
        let id = entity.id().to_string();
        self.db.patch(T::TABLE, &id, changes.clone()).await?;

        let mut merged = to_record(entity)?;
        merged.extend(changes);
        *entity = from_record(merged)?;
        Ok(())
    }

    pub async fn update_column(
        &self,
        entity: &mut T,
        column: &str,
        value: Value,
    ) -> Result<(), DbError> {
        let mut changes = Record::new();
        changes.insert(column.to_string(), value);
        self.patch(entity, changes).await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<(), DbError> {
        self.db.delete_by_id(T::TABLE, id).await
    }

    pub async fn delete_by(&self, filter: &Filter) -> Result<u64, DbError> {
        self.db.delete_by(T::TABLE, filter).await
    }

    fn check_writable(&self, field: &str) -> Result<(), DbError> {
        if field == "id" {
            return Err(DbError::ReadOnlyField(field.to_string()));
        }
        if !T::has_field(field) {
            return Err(DbError::UnknownField {
                table: T::TABLE.to_string(),
                field: field.to_string(),
            });
        }
        Ok(())
    }
}

fn absent_if_not_found<T: Entity>(found: Result<Record, DbError>) -> Result<Option<T>, DbError> {
    match found {
        Ok(record) => from_record(record).map(Some),
        Err(DbError::NotFound) => Ok(None),
        Err(other) => Err(other),
    }
}
