use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{normalize_path, ApiError, ApiRequest, ApiResponse, HttpTransport};
use crate::config::Endpoints;
use crate::models::TokenPayload;

use super::{AccessToken, AuthError, Session};

/// Login, refresh and logout against the token endpoints.
///
/// Each operation is a single round trip. The refresh credential is never seen
/// here: it rides along in the transport's cookie store.
///
/// Refreshes are single-flight: callers that arrive while one is in progress
/// wait for it and take its outcome instead of sending their own.
pub struct CredentialTransport {
    http: Arc<dyn HttpTransport>,
    session: Session,
    endpoints: Endpoints,
    refresh_lock: Mutex<()>,
}

impl CredentialTransport {
    pub fn new(http: Arc<dyn HttpTransport>, session: Session, endpoints: Endpoints) -> Self {
        Self {
            http,
            session,
            endpoints,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether `request` targets the refresh endpoint
    pub fn is_refresh_request(&self, request: &ApiRequest) -> bool {
        normalize_path(&request.path) == normalize_path(&self.endpoints.refresh)
    }

    /// Exchange username and password for an access token
    pub async fn login(&self, username: &str, password: &str) -> Result<AccessToken, AuthError> {
        let request = ApiRequest::post(&self.endpoints.login)
            .with_form([("username", username), ("password", password)]);

        let response = self.http.send(request).await?;
        if !response.is_success() {
            warn!(status = response.status.as_u16(), "Login rejected");
            return Err(AuthError::Authentication(ApiError::from_status(
                response.status,
                &response.body,
            )));
        }

        let token = Self::parse_token(&response)?;
        self.session.set_authenticated(token.clone(), Some(username.to_string()));
        info!(username, "Logged in");
        Ok(token)
    }

    /// Obtain a new access token using the ambient refresh cookie.
    ///
    /// Any failure ends the session. If the session was replaced or torn
    /// down while the call was suspended, the outcome is discarded.
    pub async fn refresh(&self) -> Result<AccessToken, AuthError> {
        let seen = self.session.generation();
        let (_, token) = self.refresh_since(seen).await?;
        Ok(token)
    }

    /// Refresh unless the session already moved past `seen_generation`, in
    /// which case the refresh (or logout) that moved it is reused.
    ///
    /// Returns the generation the caller should now be working under.
    pub(crate) async fn refresh_since(
        &self,
        seen_generation: u64,
    ) -> Result<(u64, AccessToken), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let (generation, current) = self.session.credential();
        if generation != seen_generation {
            return match current {
                Some(token) => {
                    debug!("Reusing token refreshed by a concurrent caller");
                    Ok((generation, token))
                }
                None => Err(AuthError::SessionExpired(ApiError::Unauthorized)),
            };
        }

        let outcome = match self.http.send(ApiRequest::post(&self.endpoints.refresh)).await {
            Ok(response) => response
                .error_for_status()
                .and_then(|response| Self::parse_token(&response)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(token) => match self.session.refresh_if_current(generation, token.clone()) {
                Some(applied) => {
                    debug!("Access token refreshed");
                    Ok((applied, token))
                }
                None => {
                    debug!("Discarding refreshed token, session changed during refresh");
                    Err(AuthError::Superseded)
                }
            },
            Err(e) => {
                if !self.session.end_if_current(generation) {
                    debug!(error = %e, "Ignoring refresh failure, session changed during refresh");
                    return Err(AuthError::Superseded);
                }
                info!(error = %e, "Refresh token invalid or expired, session ended");
                Err(AuthError::SessionExpired(e))
            }
        }
    }

    /// End the session. Local state is cleared before the server is told, so
    /// dropping this future mid-flight still leaves the user logged out.
    pub async fn logout(&self) {
        let token = self.session.token();
        self.session.invalidate();

        let mut request = ApiRequest::post(&self.endpoints.logout);
        if let Some(ref token) = token {
            if let Err(e) = request.set_bearer(token) {
                warn!(error = %e, "Could not attach credential to logout request");
            }
        }

        match self.http.send(request).await {
            Ok(response) if response.is_success() => info!("Logged out"),
            Ok(response) => warn!(
                status = response.status.as_u16(),
                "Server rejected logout, local session cleared anyway"
            ),
            Err(e) => warn!(error = %e, "Error during logout, local session cleared anyway"),
        }
    }

    fn parse_token(response: &ApiResponse) -> Result<AccessToken, ApiError> {
        let payload: TokenPayload = response.json()?;
        if payload.access_token.is_empty() {
            return Err(ApiError::Malformed("Empty access token".to_string()));
        }
        Ok(AccessToken::new(payload.access_token))
    }
}
