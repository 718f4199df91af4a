//! SQLite ShelterStore implementation.

use async_trait::async_trait;
use sea_query::{Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use shelterhub_client::Shelter;
use sqlx::{Row, SqlitePool};

use crate::storage::schema::Shelters;
use crate::storage::{NewShelter, Result, ShelterStore};

/// SQLite implementation of ShelterStore.
pub struct SqliteShelterStore {
    pool: SqlitePool,
}

impl SqliteShelterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShelterStore for SqliteShelterStore {
    async fn insert(&self, shelter: NewShelter) -> Result<i64> {
        let (sql, values) = Query::insert()
            .into_table(Shelters::Table)
            .columns([Shelters::Name, Shelters::Location, Shelters::Description])
            .values_panic([
                shelter.name.into(),
                shelter.location.into(),
                shelter.description.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    async fn list(&self) -> Result<Vec<Shelter>> {
        let (sql, values) = Query::select()
            .columns([
                Shelters::Id,
                Shelters::Name,
                Shelters::Location,
                Shelters::Description,
            ])
            .from(Shelters::Table)
            .order_by(Shelters::Id, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;

        let mut shelters = Vec::with_capacity(rows.len());
        for row in rows {
            shelters.push(Shelter {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                location: row.try_get("location")?,
                description: row.try_get("description")?,
            });
        }
        Ok(shelters)
    }
}
