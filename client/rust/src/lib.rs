//! Wire protocol and typed clients for shelterhub services.
//!
//! Every shelterhub process speaks the same small JSON protocol over the
//! broker: a request [`Envelope`] published to a service's durable queue and a
//! [`Reply`] published back to the caller's reply queue, matched by the
//! broker's correlation id property.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shelterhub_client::{AuthClient, RegisterRequest};
//!
//! async fn example(requester: Arc<dyn shelterhub_client::Requester>) {
//!     let auth = AuthClient::new(requester);
//!     match auth.register(&RegisterRequest::new("Ada", "ada@example.com", "pw", "pw")).await {
//!         Ok(message) => println!("{message}"),
//!         Err(e) if e.is_unavailable() => println!("auth service unavailable"),
//!         Err(e) => println!("{}", e.message()),
//!     }
//! }
//! ```
//!
//! # Mocking for Tests
//!
//! Implement [`Requester`] to script replies without a broker:
//!
//! ```rust,ignore
//! use shelterhub_client::{Envelope, Reply, Requester};
//! use async_trait::async_trait;
//!
//! struct AlwaysOk;
//!
//! #[async_trait]
//! impl Requester for AlwaysOk {
//!     async fn request(&self, _queue: &str, _envelope: Envelope)
//!         -> shelterhub_client::Result<Reply>
//!     {
//!         Ok(Reply::success("ok"))
//!     }
//! }
//! ```

pub mod client;
pub mod error;
pub mod model;
pub mod protocol;
pub mod traits;

pub use client::{AuthClient, ProfileClient, ShelterClient};
pub use error::{ClientError, Result};
pub use model::{Booking, Profile, Shelter};
pub use protocol::{
    AuthAction, BookShelterRequest, ChangePasswordRequest, CreateShelterRequest, Envelope,
    GetProfileRequest, ListBookingsRequest, ListSheltersRequest, LoginRequest, LoginResponse,
    LogoutRequest, ProfileAction, RegisterRequest, Reply, Service, ShelterAction,
    UpdateProfileRequest,
};
pub use traits::Requester;
