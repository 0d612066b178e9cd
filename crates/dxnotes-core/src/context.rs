//! Wiring of one session with its transport, pipeline and guard.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::api::{ApiClient, HttpTransport, ReqwestTransport};
use crate::auth::{AccessToken, AuthError, CredentialTransport, Session};
use crate::config::Config;
use crate::guard::NavigationGuard;

/// Everything a front end needs to run an authenticated session.
/// Clone is cheap; all clones share the same session.
#[derive(Clone)]
pub struct SessionContext {
    session: Session,
    credentials: Arc<CredentialTransport>,
    api: ApiClient,
    guard: NavigationGuard,
}

impl SessionContext {
    /// Build with a reqwest transport pointed at `config.base_url`
    pub fn new(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.base_url, config.request_timeout())
            .context("Failed to build HTTP client")?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: &Config, http: Arc<dyn HttpTransport>) -> Self {
        let session = Session::new();
        let credentials = Arc::new(CredentialTransport::new(
            http.clone(),
            session.clone(),
            config.endpoints.clone(),
        ));
        let api = ApiClient::new(http, credentials.clone());
        let guard = NavigationGuard::from_config(session.clone(), config);

        Self {
            session,
            credentials,
            api,
            guard,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn guard(&self) -> &NavigationGuard {
        &self.guard
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AccessToken, AuthError> {
        self.credentials.login(username, password).await
    }

    pub async fn refresh(&self) -> Result<AccessToken, AuthError> {
        self.credentials.refresh().await
    }

    pub async fn logout(&self) {
        self.credentials.logout().await
    }

    /// Try to resume a session from a refresh cookie left by an earlier
    /// login. Failure only means the user has to log in.
    pub async fn restore(&self) -> bool {
        match self.credentials.refresh().await {
            Ok(_) => {
                info!("Session restored from refresh credential");
                true
            }
            Err(e) => {
                info!(error = %e, "No valid refresh token found, user must log in");
                false
            }
        }
    }

    /// End the session locally and abandon any suspended refresh or retry
    pub fn teardown(&self) {
        debug!("Tearing down session");
        self.session.invalidate();
    }
}
