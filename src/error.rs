use reqwest::StatusCode;
use thiserror::Error;

/// Description used when a failed response carries no usable message.
pub const GENERIC_REQUEST_FAILURE: &str = "Request failed";

/// Failure of a call made through [`crate::client::ApiClient`].
///
/// Every variant renders a message fit for direct display.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 401.
    #[error("{}", .message.as_deref().unwrap_or(GENERIC_REQUEST_FAILURE))]
    Auth { message: Option<String> },

    /// Any other non-success status.
    #[error("{}", .message.as_deref().unwrap_or(GENERIC_REQUEST_FAILURE))]
    Request {
        status: StatusCode,
        message: Option<String>,
    },

    /// A body was present but could not be parsed as declared.
    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Could not encode request body: {0}")]
    Encode(String),
}

impl ClientError {
    /// Message supplied by the server in the error body, if there was one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Auth { message } | ClientError::Request { message, .. } => {
                message.as_deref()
            }
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Auth { .. } => Some(StatusCode::UNAUTHORIZED),
            ClientError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Auth { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

/// Failure of a session-affecting operation surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0}")]
    Login(String),

    #[error("{0}")]
    Logout(String),
}

#[derive(Error, Debug, Clone)]
pub enum ProfileError {
    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Failure of the durable credential medium.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unavailable")]
    Unavailable,

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
