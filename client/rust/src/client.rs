//! Typed clients for each shelterhub service.
//!
//! Each client owns a shared [`Requester`] and turns typed requests into
//! envelopes and replies into typed results.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::model::{Booking, Profile, Shelter};
use crate::protocol::{
    AuthAction, BookShelterRequest, ChangePasswordRequest, CreateShelterRequest, Envelope,
    GetProfileRequest, ListBookingsRequest, ListSheltersRequest, LoginRequest, LoginResponse,
    LogoutRequest, ProfileAction, RegisterRequest, Reply, Service, ShelterAction,
    UpdateProfileRequest,
};
use crate::traits::Requester;

/// Send `payload` as `action` to `service` and fail on `success: false`.
async fn invoke<T: Serialize>(
    requester: &dyn Requester,
    service: Service,
    action: &str,
    payload: &T,
) -> Result<Reply> {
    let envelope = Envelope::with_payload(action, payload)?;
    debug!(service = %service, action, "sending request");
    requester
        .request(service.queue(), envelope)
        .await?
        .into_result()
}

/// Client for the auth service.
#[derive(Clone)]
pub struct AuthClient {
    requester: Arc<dyn Requester>,
}

impl AuthClient {
    pub fn new(requester: Arc<dyn Requester>) -> Self {
        Self { requester }
    }

    /// Register an account; returns the service's confirmation message.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Auth,
            AuthAction::Register.as_str(),
            request,
        )
        .await?;
        Ok(reply.message_or_default())
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Auth,
            AuthAction::Login.as_str(),
            request,
        )
        .await?;
        LoginResponse::from_reply(&reply)
    }

    pub async fn logout(&self) -> Result<String> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Auth,
            AuthAction::Logout.as_str(),
            &LogoutRequest::default(),
        )
        .await?;
        Ok(reply.message_or_default())
    }
}

/// Client for the shelter service.
#[derive(Clone)]
pub struct ShelterClient {
    requester: Arc<dyn Requester>,
}

impl ShelterClient {
    pub fn new(requester: Arc<dyn Requester>) -> Self {
        Self { requester }
    }

    /// Create a shelter; returns its id.
    pub async fn create_shelter(&self, request: &CreateShelterRequest) -> Result<i64> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Shelter,
            ShelterAction::CreateShelter.as_str(),
            request,
        )
        .await?;
        reply.field("shelterId")
    }

    pub async fn list_shelters(&self) -> Result<Vec<Shelter>> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Shelter,
            ShelterAction::ListShelters.as_str(),
            &ListSheltersRequest::default(),
        )
        .await?;
        reply.field("shelters")
    }

    /// Book a shelter; returns the booking id.
    pub async fn book_shelter(&self, request: &BookShelterRequest) -> Result<i64> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Shelter,
            ShelterAction::BookShelter.as_str(),
            request,
        )
        .await?;
        reply.field("bookingId")
    }

    pub async fn list_bookings(&self, user_id: i64) -> Result<Vec<Booking>> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Shelter,
            ShelterAction::ListBookings.as_str(),
            &ListBookingsRequest { user_id },
        )
        .await?;
        reply.field("bookings")
    }
}

/// Client for the profile service.
#[derive(Clone)]
pub struct ProfileClient {
    requester: Arc<dyn Requester>,
}

impl ProfileClient {
    pub fn new(requester: Arc<dyn Requester>) -> Self {
        Self { requester }
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<Profile> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Profile,
            ProfileAction::GetProfile.as_str(),
            &GetProfileRequest { user_id },
        )
        .await?;
        reply.field("profile")
    }

    pub async fn update_profile(&self, request: &UpdateProfileRequest) -> Result<String> {
        if request.name.is_none() && request.email.is_none() {
            return Err(ClientError::InvalidArgument(
                "update_profile needs a name or an email".to_string(),
            ));
        }
        let reply = invoke(
            self.requester.as_ref(),
            Service::Profile,
            ProfileAction::UpdateProfile.as_str(),
            request,
        )
        .await?;
        Ok(reply.message_or_default())
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> Result<String> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Profile,
            ProfileAction::ChangePassword.as_str(),
            request,
        )
        .await?;
        Ok(reply.message_or_default())
    }

    /// Bookings of a user, as served by the profile service.
    pub async fn list_bookings(&self, user_id: i64) -> Result<Vec<Booking>> {
        let reply = invoke(
            self.requester.as_ref(),
            Service::Profile,
            ProfileAction::ListBookings.as_str(),
            &ListBookingsRequest { user_id },
        )
        .await?;
        reply.field("bookings")
    }
}
