//! Mock storage implementation for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use shelterhub_client::{Booking, Shelter};
use tokio::sync::RwLock;

use super::{
    BookingStore, NewBooking, NewShelter, NewUser, Result, ShelterStore, StorageError,
    UserRecord, UserStore,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, UserRecord>,
    shelters: BTreeMap<i64, Shelter>,
    bookings: BTreeMap<i64, Booking>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }
}

/// In-memory store implementing every storage trait.
///
/// Counts queries so tests can assert a handler never touched storage, and
/// can be told to fail every query.
#[derive(Default)]
pub struct MockStore {
    tables: RwLock<Tables>,
    queries: AtomicUsize,
    fail: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries issued so far, failed ones included.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn query(&self) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Query("Mock storage failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MockStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.query()?;
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        self.query()?;
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<i64> {
        self.query()?;
        let mut tables = self.tables.write().await;
        if tables.email_taken(&user.email, None) {
            return Err(StorageError::Duplicate("email".to_string()));
        }
        let id = tables.next_id();
        tables.users.insert(
            id,
            UserRecord {
                id,
                name: user.name,
                email: user.email,
                password_hash: user.password_hash,
            },
        );
        Ok(id)
    }

    async fn update_profile(
        &self,
        id: i64,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<bool> {
        self.query()?;
        let mut tables = self.tables.write().await;
        if let Some(email) = email {
            if tables.email_taken(email, Some(id)) {
                return Err(StorageError::Duplicate("email".to_string()));
            }
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(name) = name {
            user.name = name.to_string();
        }
        if let Some(email) = email {
            user.email = email.to_string();
        }
        Ok(true)
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        self.query()?;
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ShelterStore for MockStore {
    async fn insert(&self, shelter: NewShelter) -> Result<i64> {
        self.query()?;
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        tables.shelters.insert(
            id,
            Shelter {
                id,
                name: shelter.name,
                location: shelter.location,
                description: shelter.description,
            },
        );
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<Shelter>> {
        self.query()?;
        Ok(self.tables.read().await.shelters.values().cloned().collect())
    }
}

#[async_trait]
impl BookingStore for MockStore {
    async fn insert(&self, booking: NewBooking) -> Result<i64> {
        self.query()?;
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        tables.bookings.insert(
            id,
            Booking {
                id,
                user_id: booking.user_id,
                shelter_id: booking.shelter_id,
                booking_date: booking.booking_date,
            },
        );
        Ok(id)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Booking>> {
        self.query()?;
        Ok(self
            .tables
            .read()
            .await
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests;
