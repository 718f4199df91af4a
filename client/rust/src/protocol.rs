//! Request and reply envelopes exchanged over the broker.
//!
//! A request is `{"action": "<name>", "data": {...}}` published to the
//! service's durable queue. A reply is `{"success": bool, "message"?: "...",
//! ...fields}` published to the caller's reply queue. The correlation id and
//! reply address travel as broker message properties, never in the body.

use std::fmt;

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Prefix shared by every shelterhub queue name.
pub const QUEUE_PREFIX: &str = "shelterhub";

// ============================================================================
// Services and actions
// ============================================================================

/// A downstream service reachable over the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Auth,
    Shelter,
    Profile,
}

impl Service {
    /// Every service, in a stable order.
    pub const ALL: [Service; 3] = [Service::Auth, Service::Shelter, Service::Profile];

    /// Short service name (`auth`, `shelter`, `profile`).
    pub fn name(&self) -> &'static str {
        match self {
            Service::Auth => "auth",
            Service::Shelter => "shelter",
            Service::Profile => "profile",
        }
    }

    /// Durable queue the service consumes.
    pub fn queue(&self) -> &'static str {
        match self {
            Service::Auth => "shelterhub.auth",
            Service::Shelter => "shelterhub.shelter",
            Service::Profile => "shelterhub.profile",
        }
    }

    /// Wire names of the actions this service understands.
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Service::Auth => AuthAction::NAMES,
            Service::Shelter => ShelterAction::NAMES,
            Service::Profile => ProfileAction::NAMES,
        }
    }
}

impl std::str::FromStr for Service {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Service::ALL
            .into_iter()
            .find(|svc| svc.name() == s || svc.queue() == s)
            .ok_or_else(|| ClientError::InvalidArgument(format!("unknown service: {}", s)))
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! action_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Wire names of every action, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$($wire),+];

            /// Wire name of this action.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ClientError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(ClientError::InvalidArgument(format!(
                        "unknown {} action: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

action_enum! {
    /// Actions served by the auth service.
    AuthAction {
        Register => "register",
        Login => "login",
        Logout => "logout",
    }
}

action_enum! {
    /// Actions served by the shelter service.
    ShelterAction {
        CreateShelter => "create_shelter",
        ListShelters => "list_shelters",
        BookShelter => "book_shelter",
        ListBookings => "list_bookings",
    }
}

action_enum! {
    /// Actions served by the profile service.
    ProfileAction {
        GetProfile => "get_profile",
        UpdateProfile => "update_profile",
        ChangePassword => "change_password",
        ListBookings => "list_bookings",
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Request envelope published to a service queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Envelope {
    pub fn new(action: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// Build an envelope whose `data` is the serialized payload.
    ///
    /// The payload must serialize to a JSON object (or unit).
    pub fn with_payload<T: Serialize>(action: impl Into<String>, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?
        {
            Value::Object(data) => Ok(Self::new(action, data)),
            Value::Null => Ok(Self::new(action, Map::new())),
            other => Err(ClientError::InvalidArgument(format!(
                "payload must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Decode the `data` mapping into a typed request.
    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Reply envelope published to the requester's reply queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Action-specific fields, flattened next to `success`/`message`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Reply {
    /// Successful reply with a message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            fields: Map::new(),
        }
    }

    /// Successful reply without a message.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            fields: Map::new(),
        }
    }

    /// Domain failure (`success: false`) with a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Attach a serializable value as an action-specific field.
    pub fn with_serialized<T: Serialize>(
        self,
        key: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.with_field(key, value))
    }

    /// Decode an action-specific field.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .fields
            .get(key)
            .ok_or_else(|| ClientError::InvalidReply(format!("missing field `{}`", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ClientError::InvalidReply(format!("field `{}`: {}", key, e)))
    }

    pub fn message_or_default(&self) -> String {
        self.message.clone().unwrap_or_default()
    }

    /// Turn a `success: false` reply into [`ClientError::Rejected`].
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ClientError::Rejected {
                message: self
                    .message
                    .unwrap_or_else(|| "Request failed".to_string()),
            })
        }
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

// ============================================================================
// Identifier fields
// ============================================================================

/// Identifier fields accept JSON numbers or numeric strings.
///
/// Form posts and URL segments deliver ids as strings; stored rows deliver
/// them as numbers.
pub mod id {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    fn parse<E: de::Error>(raw: RawId) -> std::result::Result<Option<i64>, E> {
        match raw {
            RawId::Number(n) => Ok(Some(n)),
            RawId::Text(s) if s.trim().is_empty() => Ok(None),
            RawId::Text(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid identifier `{}`", s))),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse(RawId::deserialize(deserializer)?)?
            .ok_or_else(|| de::Error::custom("identifier must not be empty"))
    }

    pub fn optional<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<RawId>::deserialize(deserializer)? {
            Some(raw) => parse(raw),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Typed requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

impl RegisterRequest {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        password_confirm: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            password_confirm: password_confirm.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {}

/// Shelter creation; fields are optional on the wire so the service can
/// report every missing one with a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateShelterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CreateShelterRequest {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            location: Some(location.into()),
            description: Some(description.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSheltersRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookShelterRequest {
    #[serde(
        default,
        deserialize_with = "id::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<i64>,
    #[serde(
        default,
        deserialize_with = "id::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub shelter_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_date: Option<String>,
}

impl BookShelterRequest {
    pub fn new(user_id: i64, shelter_id: i64, booking_date: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            shelter_id: Some(shelter_id),
            booking_date: Some(booking_date.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBookingsRequest {
    #[serde(deserialize_with = "id::deserialize")]
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProfileRequest {
    #[serde(deserialize_with = "id::deserialize")]
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(deserialize_with = "id::deserialize")]
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(deserialize_with = "id::deserialize")]
    pub user_id: i64,
    #[serde(rename = "oldPassword")]
    pub old_password: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
}

// ============================================================================
// Typed responses
// ============================================================================

/// Successful login: the message and the authenticated user's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub message: String,
    pub user_id: i64,
}

impl LoginResponse {
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        Ok(Self {
            message: reply.message_or_default(),
            user_id: reply.field("userId")?,
        })
    }
}
