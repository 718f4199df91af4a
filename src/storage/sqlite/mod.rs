//! SQLite implementations of the storage traits.

mod booking_store;
mod shelter_store;
mod user_store;

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub use booking_store::SqliteBookingStore;
pub use shelter_store::SqliteShelterStore;
pub use user_store::SqliteUserStore;

use super::schema;
use super::{Result, StorageError};
use crate::config::SqliteConfig;

/// Open a pool for the configured database, creating its directory.
///
/// An in-memory database lives in a single connection that is never
/// recycled.
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool> {
    let in_memory = config.path == ":memory:";

    if !in_memory {
        if let Some(parent) = Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    Ok(options.connect(&config.url()).await?)
}

/// Create tables if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in [
        schema::CREATE_USERS_TABLE,
        schema::CREATE_SHELTERS_TABLE,
        schema::CREATE_BOOKINGS_TABLE,
        schema::CREATE_BOOKINGS_USER_INDEX,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Map a unique-constraint violation to [`StorageError::Duplicate`].
fn unique_violation(e: sqlx::Error, column: &str) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Duplicate(column.to_string())
        }
        _ => StorageError::Database(e),
    }
}
