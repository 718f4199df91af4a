//! Records returned by the services.
//!
//! Field names match the rows the services store, so list replies are the
//! rows themselves.

use serde::{Deserialize, Serialize};

/// A bookable shelter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shelter {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub description: String,
}

/// A user's booking of a shelter on a date (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub shelter_id: i64,
    pub booking_date: String,
}

/// Public view of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub email: String,
}
