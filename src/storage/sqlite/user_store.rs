//! SQLite UserStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, Query, SimpleExpr, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::unique_violation;
use crate::storage::schema::Users;
use crate::storage::{NewUser, Result, UserRecord, UserStore};

/// SQLite implementation of UserStore.
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_where(&self, condition: SimpleExpr) -> Result<Option<UserRecord>> {
        let (sql, values) = Query::select()
            .columns([Users::Id, Users::Name, Users::Email, Users::Password])
            .from(Users::Table)
            .and_where(condition)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| from_row(&row)).transpose()
    }
}

fn from_row(row: &SqliteRow) -> Result<UserRecord> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password")?,
    })
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.find_where(Expr::col(Users::Email).eq(email)).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        self.find_where(Expr::col(Users::Id).eq(id)).await
    }

    async fn insert(&self, user: NewUser) -> Result<i64> {
        let (sql, values) = Query::insert()
            .into_table(Users::Table)
            .columns([Users::Name, Users::Email, Users::Password])
            .values_panic([
                user.name.into(),
                user.email.into(),
                user.password_hash.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await
            .map_err(|e| unique_violation(e, "email"))?;

        Ok(result.last_insert_rowid())
    }

    async fn update_profile(
        &self,
        id: i64,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<bool> {
        let mut changes: Vec<(Users, SimpleExpr)> = Vec::new();
        if let Some(name) = name {
            changes.push((Users::Name, name.into()));
        }
        if let Some(email) = email {
            changes.push((Users::Email, email.into()));
        }
        if changes.is_empty() {
            return Ok(self.find_by_id(id).await?.is_some());
        }

        let (sql, values) = Query::update()
            .table(Users::Table)
            .values(changes)
            .and_where(Expr::col(Users::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await
            .map_err(|e| unique_violation(e, "email"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        let (sql, values) = Query::update()
            .table(Users::Table)
            .values([(Users::Password, password_hash.into())])
            .and_where(Expr::col(Users::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
