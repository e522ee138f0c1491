//! Request and response bodies for the authentication endpoints
//!
//! Request bodies are trimmed with `normalized()` before validation so that
//! surrounding whitespace never decides whether an email is well formed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::{Role, UserProfile};
use utoipa::ToSchema;
use validator::Validate;

/// Self-registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email should be a valid email")
    )]
    #[schema(example = "jane@example.com")]
    pub email: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,

    #[serde(default)]
    #[validate(length(min = 8, message = "Password length should be at least 8 chars"))]
    pub password: String,
}

impl RegisterRequest {
    pub fn normalized(self) -> Self {
        Self {
            email: self.email.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            password: self.password,
        }
    }
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email should be a valid email")
    )]
    pub email: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

impl LoginRequest {
    pub fn normalized(self) -> Self {
        Self {
            email: self.email.trim().to_string(),
            password: self.password,
        }
    }
}

/// Administrator request to create a manager account
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email should be a valid email")
    )]
    pub email: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,

    #[serde(default)]
    #[validate(length(min = 8, message = "Password length should be at least 8 chars"))]
    pub password: String,

    /// Tenant the manager belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<i64>,
}

impl CreateUserRequest {
    pub fn normalized(self) -> Self {
        Self {
            email: self.email.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            ..self
        }
    }
}

/// Id of the affected user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdResponse {
    pub id: i64,
}

/// Empty JSON object
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EmptyResponse {}

/// The authenticated user's profile
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileResponse {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[schema(value_type = String, example = "customer")]
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<UserProfile> for UserProfileResponse {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            role: profile.role,
            tenant_id: profile.tenant_id,
            created_at: profile.created_at,
        }
    }
}
