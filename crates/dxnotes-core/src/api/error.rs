use reqwest::header::InvalidHeaderValue;
use reqwest::StatusCode;
use thiserror::Error;

/// Failures of a single exchange with the notes API.
///
/// Only `Unauthorized` feeds the refresh-and-retry protocol; everything else
/// reaches the caller as-is.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated or access token expired")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server failed with {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Could not encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// Longest slice of a response body kept in an error message
const ERROR_BODY_LIMIT: usize = 500;

/// Cut `body` down to `ERROR_BODY_LIMIT` bytes on a char boundary
fn excerpt(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &body[..end], body.len())
}

impl ApiError {
    /// Classify a non-2xx response
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden(excerpt(body)),
            StatusCode::NOT_FOUND => ApiError::NotFound(excerpt(body)),
            s if s.is_server_error() => ApiError::Server {
                status: s.as_u16(),
                body: excerpt(body),
            },
            s => ApiError::UnexpectedStatus {
                status: s.as_u16(),
                body: excerpt(body),
            },
        }
    }

    /// Whether this error belongs to the "unauthorized" class that triggers a refresh
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
