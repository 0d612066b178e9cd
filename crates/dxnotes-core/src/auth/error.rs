use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Login was rejected by the server. Session state is unchanged.
    #[error("Authentication failed: {0}")]
    Authentication(#[source] ApiError),

    /// Refresh was rejected. Session state has been cleared.
    #[error("Session expired - please log in again")]
    SessionExpired(#[source] ApiError),

    /// The session was replaced or torn down while this request was suspended
    #[error("Session changed while the request was in flight")]
    Superseded,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthError {
    /// Whether the caller should route the user back to the login view
    pub fn requires_login(&self) -> bool {
        matches!(self, AuthError::SessionExpired(_))
            || matches!(self, AuthError::Api(e) if e.is_unauthorized())
    }
}
