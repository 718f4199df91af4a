//! Auth service: registration, login, logout.

use std::sync::Arc;

use shelterhub_client::{AuthAction, LoginRequest, LogoutRequest, RegisterRequest, Reply};
use tracing::info;

use crate::dispatch::{HandlerError, HandlerRegistry, HandlerResult};
use crate::password::PasswordHasher;
use crate::storage::{NewUser, StorageError, UserStore};

const PASSWORD_MISMATCH: &str = "Passwords do not match!";
const EMAIL_IN_USE: &str = "This email is already in use";
const BAD_CREDENTIALS: &str = "Email or Password is incorrect";

pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { users, hasher }
    }

    pub fn handlers(self: Arc<Self>) -> HandlerRegistry {
        let register = self.clone();
        let login = self.clone();
        let logout = self;

        HandlerRegistry::new()
            .on(AuthAction::Register.as_str(), move |req: RegisterRequest| {
                let svc = register.clone();
                async move { svc.register(req).await }
            })
            .on(AuthAction::Login.as_str(), move |req: LoginRequest| {
                let svc = login.clone();
                async move { svc.login(req).await }
            })
            .on(AuthAction::Logout.as_str(), move |req: LogoutRequest| {
                let svc = logout.clone();
                async move { svc.logout(req).await }
            })
    }

    /// Create an account. Mismatched passwords are refused before storage is
    /// touched.
    pub async fn register(&self, req: RegisterRequest) -> HandlerResult {
        if req.password != req.password_confirm {
            return Err(HandlerError::rejected(PASSWORD_MISMATCH));
        }

        if self.users.find_by_email(&req.email).await?.is_some() {
            return Err(HandlerError::rejected(EMAIL_IN_USE));
        }

        let password_hash = self.hasher.hash(&req.password).await?;
        let user = NewUser {
            name: req.name,
            email: req.email,
            password_hash,
        };

        match self.users.insert(user).await {
            Ok(id) => {
                info!(user_id = id, "User registered");
                Ok(Reply::success("User registered successfully!"))
            }
            // Lost a race with a concurrent registration.
            Err(StorageError::Duplicate(_)) => Err(HandlerError::rejected(EMAIL_IN_USE)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn login(&self, req: LoginRequest) -> HandlerResult {
        let Some(user) = self.users.find_by_email(&req.email).await? else {
            return Err(HandlerError::rejected(BAD_CREDENTIALS));
        };

        if !self.hasher.verify(&req.password, &user.password_hash).await? {
            return Err(HandlerError::rejected(BAD_CREDENTIALS));
        }

        Ok(Reply::success("Logged in successfully").with_field("userId", user.id))
    }

    /// Sessions live in the front end; there is nothing to tear down here.
    pub async fn logout(&self, _req: LogoutRequest) -> HandlerResult {
        Ok(Reply::success("Logged out successfully"))
    }
}
