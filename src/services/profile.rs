//! Profile service: account details, password change and booking history.

use std::sync::Arc;

use shelterhub_client::{
    ChangePasswordRequest, GetProfileRequest, ListBookingsRequest, ProfileAction, Reply,
    UpdateProfileRequest,
};
use tracing::info;

use super::non_blank;
use crate::dispatch::{HandlerError, HandlerRegistry, HandlerResult};
use crate::password::PasswordHasher;
use crate::storage::{BookingStore, StorageError, UserStore};

const USER_NOT_FOUND: &str = "User not found";
const EMAIL_IN_USE: &str = "This email is already in use";
const OLD_PASSWORD_INCORRECT: &str = "Old password is incorrect";

pub struct ProfileService {
    users: Arc<dyn UserStore>,
    bookings: Arc<dyn BookingStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl ProfileService {
    pub fn new(
        users: Arc<dyn UserStore>,
        bookings: Arc<dyn BookingStore>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            users,
            bookings,
            hasher,
        }
    }

    pub fn handlers(self: Arc<Self>) -> HandlerRegistry {
        let get = self.clone();
        let update = self.clone();
        let password = self.clone();
        let history = self;

        HandlerRegistry::new()
            .on(
                ProfileAction::GetProfile.as_str(),
                move |req: GetProfileRequest| {
                    let svc = get.clone();
                    async move { svc.get_profile(req).await }
                },
            )
            .on(
                ProfileAction::UpdateProfile.as_str(),
                move |req: UpdateProfileRequest| {
                    let svc = update.clone();
                    async move { svc.update_profile(req).await }
                },
            )
            .on(
                ProfileAction::ChangePassword.as_str(),
                move |req: ChangePasswordRequest| {
                    let svc = password.clone();
                    async move { svc.change_password(req).await }
                },
            )
            .on(
                ProfileAction::ListBookings.as_str(),
                move |req: ListBookingsRequest| {
                    let svc = history.clone();
                    async move { svc.list_bookings(req).await }
                },
            )
    }

    pub async fn get_profile(&self, req: GetProfileRequest) -> HandlerResult {
        let Some(user) = self.users.find_by_id(req.user_id).await? else {
            return Err(HandlerError::rejected(USER_NOT_FOUND));
        };
        Ok(Reply::ok().with_serialized("profile", &user.profile())?)
    }

    /// Blank fields are left unchanged.
    pub async fn update_profile(&self, req: UpdateProfileRequest) -> HandlerResult {
        let name = non_blank(req.name);
        let email = non_blank(req.email);

        match self
            .users
            .update_profile(req.user_id, name.as_deref(), email.as_deref())
            .await
        {
            Ok(true) => {
                info!(user_id = req.user_id, "Profile updated");
                Ok(Reply::success("Profile updated successfully"))
            }
            Ok(false) => Err(HandlerError::rejected(USER_NOT_FOUND)),
            Err(StorageError::Duplicate(_)) => Err(HandlerError::rejected(EMAIL_IN_USE)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn change_password(&self, req: ChangePasswordRequest) -> HandlerResult {
        let Some(user) = self.users.find_by_id(req.user_id).await? else {
            return Err(HandlerError::rejected(USER_NOT_FOUND));
        };

        if !self
            .hasher
            .verify(&req.old_password, &user.password_hash)
            .await?
        {
            return Err(HandlerError::rejected(OLD_PASSWORD_INCORRECT));
        }

        let digest = self.hasher.hash(&req.new_password).await?;
        if !self.users.update_password(user.id, &digest).await? {
            // Deleted between the lookup and the update.
            return Err(HandlerError::rejected(USER_NOT_FOUND));
        }

        info!(user_id = user.id, "Password changed");
        Ok(Reply::success("Password changed successfully"))
    }

    pub async fn list_bookings(&self, req: ListBookingsRequest) -> HandlerResult {
        let bookings = self.bookings.list_for_user(req.user_id).await?;
        Ok(Reply::ok().with_serialized("bookings", &bookings)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::Argon2Hasher;
    use crate::storage::{MockStore, NewBooking, NewUser};
    use shelterhub_client::{Booking, Profile};

    struct Fixture {
        store: Arc<MockStore>,
        svc: ProfileService,
        hasher: Arc<Argon2Hasher>,
    }

    async fn fixture() -> (Fixture, i64) {
        let store = Arc::new(MockStore::new());
        let hasher = Arc::new(Argon2Hasher::fast());
        let svc = ProfileService::new(store.clone(), store.clone(), hasher.clone());

        let digest = hasher.hash("secret").await.unwrap();
        let id = UserStore::insert(
            store.as_ref(),
            NewUser {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                password_hash: digest,
            },
        )
        .await
        .unwrap();

        (Fixture { store, svc, hasher }, id)
    }

    fn rejection(result: HandlerResult) -> String {
        match result {
            Err(HandlerError::Rejected(message)) => message,
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_profile_omits_password() {
        let (f, id) = fixture().await;

        let reply = f.svc.get_profile(GetProfileRequest { user_id: id }).await.unwrap();
        assert!(reply.success);
        let profile: Profile = reply.field("profile").unwrap();
        assert_eq!(
            profile,
            Profile {
                id,
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            }
        );
        assert!(reply.fields["profile"].get("password").is_none());
    }

    #[tokio::test]
    async fn test_get_profile_unknown_user() {
        let (f, _) = fixture().await;
        let result = f.svc.get_profile(GetProfileRequest { user_id: 999 }).await;
        assert_eq!(rejection(result), "User not found");
    }

    #[tokio::test]
    async fn test_update_profile() {
        let (f, id) = fixture().await;

        let reply = f
            .svc
            .update_profile(UpdateProfileRequest {
                user_id: id,
                name: Some("Ada L".to_string()),
                email: Some("   ".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("Profile updated successfully"));

        let user = f.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.name, "Ada L");
        assert_eq!(user.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_update_profile_unknown_user() {
        let (f, _) = fixture().await;
        let result = f
            .svc
            .update_profile(UpdateProfileRequest {
                user_id: 999,
                name: Some("X".to_string()),
                email: None,
            })
            .await;
        assert_eq!(rejection(result), "User not found");
    }

    #[tokio::test]
    async fn test_update_profile_to_taken_email() {
        let (f, id) = fixture().await;
        UserStore::insert(
            f.store.as_ref(),
            NewUser {
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
                password_hash: "x".to_string(),
            },
        )
        .await
        .unwrap();

        let result = f
            .svc
            .update_profile(UpdateProfileRequest {
                user_id: id,
                name: None,
                email: Some("bob@example.com".to_string()),
            })
            .await;
        assert_eq!(rejection(result), "This email is already in use");
    }

    #[tokio::test]
    async fn test_change_password() {
        let (f, id) = fixture().await;

        let reply = f
            .svc
            .change_password(ChangePasswordRequest {
                user_id: id,
                old_password: "secret".to_string(),
                new_password: "fresh".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("Password changed successfully"));

        let user = f.store.find_by_id(id).await.unwrap().unwrap();
        assert!(f.hasher.verify("fresh", &user.password_hash).await.unwrap());
        assert!(!f.hasher.verify("secret", &user.password_hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_change_password_wrong_old_password() {
        let (f, id) = fixture().await;
        let result = f
            .svc
            .change_password(ChangePasswordRequest {
                user_id: id,
                old_password: "guess".to_string(),
                new_password: "fresh".to_string(),
            })
            .await;
        assert_eq!(rejection(result), "Old password is incorrect");
    }

    #[tokio::test]
    async fn test_change_password_unknown_user() {
        let (f, _) = fixture().await;
        let result = f
            .svc
            .change_password(ChangePasswordRequest {
                user_id: 999,
                old_password: "secret".to_string(),
                new_password: "fresh".to_string(),
            })
            .await;
        assert_eq!(rejection(result), "User not found");
    }

    #[tokio::test]
    async fn test_booking_history() {
        let (f, id) = fixture().await;
        for shelter_id in [1, 2] {
            BookingStore::insert(
                f.store.as_ref(),
                NewBooking {
                    user_id: id,
                    shelter_id,
                    booking_date: "2024-06-01".to_string(),
                },
            )
            .await
            .unwrap();
        }

        let bookings: Vec<Booking> = f
            .svc
            .list_bookings(ListBookingsRequest { user_id: id })
            .await
            .unwrap()
            .field("bookings")
            .unwrap();
        assert_eq!(bookings.len(), 2);
        assert!(bookings.iter().all(|b| b.user_id == id));
    }
}
