//! Storage collaborators for the action handlers.
//!
//! Handlers see three narrow async traits. The SQLite implementation backs
//! the service binaries; [`MockStore`] backs unit and scenario tests.

use std::sync::Arc;

use async_trait::async_trait;
use shelterhub_client::{Booking, Shelter};

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBookingStore, SqliteShelterStore, SqliteUserStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A unique column already holds the value.
    #[error("Duplicate value for {0}")]
    Duplicate(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stored user account, including the password digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

impl UserRecord {
    /// Public view, without the digest.
    pub fn profile(&self) -> shelterhub_client::Profile {
        shelterhub_client::Profile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShelter {
    pub name: String,
    pub location: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub user_id: i64,
    pub shelter_id: i64,
    /// `YYYY-MM-DD`
    pub booking_date: String,
}

/// User accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>>;

    /// Insert a user and return its id. Fails with
    /// [`StorageError::Duplicate`] if the email is taken.
    async fn insert(&self, user: NewUser) -> Result<i64>;

    /// Update the given fields. Returns false if no such user exists.
    async fn update_profile(
        &self,
        id: i64,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<bool>;

    /// Replace the password digest. Returns false if no such user exists.
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool>;
}

/// Shelters.
#[async_trait]
pub trait ShelterStore: Send + Sync {
    async fn insert(&self, shelter: NewShelter) -> Result<i64>;

    async fn list(&self) -> Result<Vec<Shelter>>;
}

/// Bookings.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: NewBooking) -> Result<i64>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Booking>>;
}

/// The three stores a deployment shares.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub shelters: Arc<dyn ShelterStore>,
    pub bookings: Arc<dyn BookingStore>,
}

impl Stores {
    /// All three stores backed by one in-memory [`MockStore`].
    pub fn in_memory(store: Arc<MockStore>) -> Self {
        Self {
            users: store.clone(),
            shelters: store.clone(),
            bookings: store,
        }
    }
}

/// Initialize storage based on configuration.
#[cfg(feature = "sqlite")]
pub async fn init_storage(config: &crate::config::StorageConfig) -> Result<Stores> {
    use crate::config::StorageType;
    use tracing::info;

    match config.storage_type {
        StorageType::Sqlite => {
            info!(path = %config.sqlite.path, "Storage: sqlite");
            let pool = sqlite::connect(&config.sqlite).await?;
            sqlite::init_schema(&pool).await?;

            Ok(Stores {
                users: Arc::new(SqliteUserStore::new(pool.clone())),
                shelters: Arc::new(SqliteShelterStore::new(pool.clone())),
                bookings: Arc::new(SqliteBookingStore::new(pool)),
            })
        }
    }
}
