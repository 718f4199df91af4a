//! Shelter service: shelters and bookings.

use std::sync::Arc;

use chrono::NaiveDate;
use shelterhub_client::{
    BookShelterRequest, CreateShelterRequest, ListBookingsRequest, ListSheltersRequest, Reply,
    ShelterAction,
};
use tracing::info;

use super::non_blank;
use crate::dispatch::{HandlerError, HandlerRegistry, HandlerResult};
use crate::storage::{BookingStore, NewBooking, NewShelter, ShelterStore};

const SHELTER_FIELDS_REQUIRED: &str =
    "Please provide all required fields: name, location, description";
const BOOKING_FIELDS_REQUIRED: &str =
    "Please provide all required fields: user_id, shelter_id, booking_date";
const INVALID_BOOKING_DATE: &str = "Invalid booking date";

pub struct ShelterService {
    shelters: Arc<dyn ShelterStore>,
    bookings: Arc<dyn BookingStore>,
}

impl ShelterService {
    pub fn new(shelters: Arc<dyn ShelterStore>, bookings: Arc<dyn BookingStore>) -> Self {
        Self { shelters, bookings }
    }

    pub fn handlers(self: Arc<Self>) -> HandlerRegistry {
        let create = self.clone();
        let list = self.clone();
        let book = self.clone();
        let bookings = self;

        HandlerRegistry::new()
            .on(
                ShelterAction::CreateShelter.as_str(),
                move |req: CreateShelterRequest| {
                    let svc = create.clone();
                    async move { svc.create_shelter(req).await }
                },
            )
            .on(
                ShelterAction::ListShelters.as_str(),
                move |req: ListSheltersRequest| {
                    let svc = list.clone();
                    async move { svc.list_shelters(req).await }
                },
            )
            .on(
                ShelterAction::BookShelter.as_str(),
                move |req: BookShelterRequest| {
                    let svc = book.clone();
                    async move { svc.book_shelter(req).await }
                },
            )
            .on(
                ShelterAction::ListBookings.as_str(),
                move |req: ListBookingsRequest| {
                    let svc = bookings.clone();
                    async move { svc.list_bookings(req).await }
                },
            )
    }

    pub async fn create_shelter(&self, req: CreateShelterRequest) -> HandlerResult {
        let (Some(name), Some(location), Some(description)) = (
            non_blank(req.name),
            non_blank(req.location),
            non_blank(req.description),
        ) else {
            return Err(HandlerError::rejected(SHELTER_FIELDS_REQUIRED));
        };

        let id = self
            .shelters
            .insert(NewShelter {
                name,
                location,
                description,
            })
            .await?;

        info!(shelter_id = id, "Shelter created");
        Ok(Reply::success("Shelter created successfully").with_field("shelterId", id))
    }

    pub async fn list_shelters(&self, _req: ListSheltersRequest) -> HandlerResult {
        let shelters = self.shelters.list().await?;
        Ok(Reply::ok().with_serialized("shelters", &shelters)?)
    }

    pub async fn book_shelter(&self, req: BookShelterRequest) -> HandlerResult {
        let (Some(user_id), Some(shelter_id), Some(booking_date)) = (
            req.user_id.filter(|id| *id > 0),
            req.shelter_id.filter(|id| *id > 0),
            non_blank(req.booking_date),
        ) else {
            return Err(HandlerError::rejected(BOOKING_FIELDS_REQUIRED));
        };

        let date = NaiveDate::parse_from_str(booking_date.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerError::rejected(INVALID_BOOKING_DATE))?;

        let id = self
            .bookings
            .insert(NewBooking {
                user_id,
                shelter_id,
                booking_date: date.format("%Y-%m-%d").to_string(),
            })
            .await?;

        info!(booking_id = id, user_id, shelter_id, "Shelter booked");
        Ok(Reply::success("Shelter booked successfully").with_field("bookingId", id))
    }

    pub async fn list_bookings(&self, req: ListBookingsRequest) -> HandlerResult {
        let bookings = self.bookings.list_for_user(req.user_id).await?;
        Ok(Reply::ok().with_serialized("bookings", &bookings)?)
    }
}
