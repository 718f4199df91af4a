//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Users table schema.
#[derive(Iden)]
pub enum Users {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "email"]
    Email,
    #[iden = "password"]
    Password,
}

/// Shelters table schema.
#[derive(Iden)]
pub enum Shelters {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "location"]
    Location,
    #[iden = "description"]
    Description,
}

/// Bookings table schema.
#[derive(Iden)]
pub enum Bookings {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "shelter_id"]
    ShelterId,
    #[iden = "booking_date"]
    BookingDate,
    #[iden = "created_at"]
    CreatedAt,
}

/// SQL for creating the users table.
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL
)
"#;

/// SQL for creating the shelters table.
pub const CREATE_SHELTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS shelters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    description TEXT NOT NULL
)
"#;

/// SQL for creating the bookings table.
pub const CREATE_BOOKINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bookings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    shelter_id INTEGER NOT NULL,
    booking_date TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_BOOKINGS_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_bookings_user ON bookings(user_id)";
