use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::ApiResponse;

/// Signed-in user. Only `id` and `email` are relied upon; everything else the
/// backend sends is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "avatar")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Name to show in the UI: `name`, then `displayName`, then the email.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.display_name.as_deref())
            .unwrap_or(&self.email)
    }
}

/// Request body for login.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Everything a login response may carry; all of it optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default, alias = "access_token")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "expires_in")]
    pub expires_in: Option<u64>,
}

impl LoginResponse {
    /// Lenient decode: an empty, textual or unexpected body counts as an empty payload.
    pub fn from_response(response: ApiResponse) -> Self {
        match response {
            ApiResponse::Json(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "unexpected login payload; ignoring it");
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// `accessToken` wins over `token`.
    pub fn bearer(&self) -> Option<&str> {
        self.access_token.as_deref().or(self.token.as_deref())
    }
}

/// Session-check body: the user bare or wrapped under `user`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum SessionPayload {
    Wrapped { user: User },
    Bare(User),
}

impl SessionPayload {
    pub(crate) fn into_user(self) -> User {
        match self {
            SessionPayload::Wrapped { user } | SessionPayload::Bare(user) => user,
        }
    }
}
