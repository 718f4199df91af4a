//! Action handlers for the auth, shelter and profile services.
//!
//! Each service is a plain struct over its collaborators with one async
//! method per action; `handlers()` exposes those methods to a
//! [`Dispatcher`](crate::dispatch::Dispatcher) keyed by the wire action
//! names.

pub mod auth;
pub mod profile;
pub mod shelter;

pub use auth::AuthService;
pub use profile::ProfileService;
pub use shelter::ShelterService;

use std::sync::Arc;

use shelterhub_client::Service;

use crate::dispatch::HandlerRegistry;
use crate::password::PasswordHasher;
use crate::storage::Stores;

/// Handlers for `service` over the given collaborators.
pub fn handlers_for(
    service: Service,
    stores: &Stores,
    hasher: Arc<dyn PasswordHasher>,
) -> HandlerRegistry {
    match service {
        Service::Auth => Arc::new(AuthService::new(stores.users.clone(), hasher)).handlers(),
        Service::Shelter => {
            Arc::new(ShelterService::new(stores.shelters.clone(), stores.bookings.clone()))
                .handlers()
        }
        Service::Profile => Arc::new(ProfileService::new(
            stores.users.clone(),
            stores.bookings.clone(),
            hasher,
        ))
        .handlers(),
    }
}

/// Treat empty or whitespace-only strings as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
