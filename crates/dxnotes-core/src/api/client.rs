//! Request pipeline for the notes API.
//!
//! Every protected call goes through [`ApiClient::execute`], which wraps the
//! transport with two hooks:
//!
//! - outbound: attach the current access token as a bearer header (or none
//!   when anonymous)
//! - inbound: on `401 Unauthorized`, refresh the token once and re-send the
//!   same request once
//!
//! A request that has already been retried, or that is itself the refresh
//! call, never triggers another refresh.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::{AuthError, CredentialTransport, Session};
use crate::models::{Consultation, DiagnosisCode, NewConsultation};

use super::request::{ApiRequest, ApiResponse, PendingRequest};
use super::{ApiError, HttpTransport};

/// What the inbound hook decided for a response
enum Inbound {
    Complete(ApiResponse),
    Retry,
}

/// Authenticated API client.
/// Clone is cheap; clones share the transport and the credential transport.
#[derive(Clone)]
pub struct ApiClient {
    http: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialTransport>,
}

impl ApiClient {
    pub fn new(http: Arc<dyn HttpTransport>, credentials: Arc<CredentialTransport>) -> Self {
        Self { http, credentials }
    }

    pub fn session(&self) -> &Session {
        self.credentials.session()
    }

    /// Send `request` through the pipeline.
    ///
    /// Returns the server's response for any status other than a 401 that the
    /// pipeline handled; non-2xx statuses are not turned into errors here.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        let mut pending = PendingRequest::new(request);

        loop {
            self.attach_credential(&mut pending)?;
            let response = self.http.send(pending.request.clone()).await?;

            match self.inspect_response(&mut pending, response).await? {
                Inbound::Complete(response) => return Ok(response),
                Inbound::Retry => {
                    debug!(path = %pending.request.path, "Retrying request with refreshed token");
                }
            }
        }
    }

    /// Outbound hook
    fn attach_credential(&self, pending: &mut PendingRequest) -> Result<(), AuthError> {
        let (generation, token) = self.session().credential();

        if let Some(refreshed) = pending.refreshed_generation {
            // The session moved on (logout, teardown, new login) between the
            // refresh and this retry
            if generation != refreshed {
                debug!(path = %pending.request.path, "Abandoning retry, session changed");
                return Err(AuthError::Superseded);
            }
        }

        match token {
            Some(ref token) => pending.request.set_bearer(token)?,
            None => pending.request.clear_bearer(),
        }
        pending.sent_generation = generation;
        Ok(())
    }

    /// Inbound hook
    async fn inspect_response(
        &self,
        pending: &mut PendingRequest,
        response: ApiResponse,
    ) -> Result<Inbound, AuthError> {
        if !response.is_unauthorized() {
            return Ok(Inbound::Complete(response));
        }

        if self.credentials.is_refresh_request(&pending.request) {
            warn!("Refresh endpoint rejected the session");
            self.session().clear();
            return Err(AuthError::SessionExpired(ApiError::Unauthorized));
        }

        if pending.retried {
            debug!(path = %pending.request.path, "Still unauthorized after refresh, giving up");
            return Err(ApiError::from_status(response.status, &response.body).into());
        }

        pending.retried = true;
        let generation = self.refresh_after_rejection(pending.sent_generation).await?;
        pending.refreshed_generation = Some(generation);
        Ok(Inbound::Retry)
    }

    /// Make sure the session holds a token newer than the one that was
    /// rejected, refreshing only if no other caller already did.
    async fn refresh_after_rejection(&self, sent_generation: u64) -> Result<u64, AuthError> {
        let (generation, _) = self.credentials.refresh_since(sent_generation).await?;
        Ok(generation)
    }

    /// Execute and turn non-2xx statuses into errors
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        let response = self.execute(request).await?;
        Ok(response.error_for_status()?)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AuthError> {
        let mut request = ApiRequest::get(path);
        for (key, value) in query {
            request = request.with_query(*key, *value);
        }
        let response = self.send(request).await?;
        Ok(response.json()?)
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let request = ApiRequest::post(path).with_json(body)?;
        let response = self.send(request).await?;
        Ok(response.json()?)
    }

    // ===== Notes API =====

    /// Look up diagnosis codes. Empty category/subcategory widen the search.
    pub async fn search_diagnosis(
        &self,
        chapter_code: &str,
        category_code: &str,
        subcategory_code: &str,
    ) -> Result<Vec<DiagnosisCode>, AuthError> {
        self.get_json(
            "/diagnosis",
            &[
                ("chapter_code", chapter_code),
                ("category_code", category_code),
                ("subcategory_code", subcategory_code),
            ],
        )
        .await
    }

    pub async fn save_consultation(&self, note: &NewConsultation) -> Result<Consultation, AuthError> {
        self.post_json("/consultation", note).await
    }

    pub async fn list_consultations(&self, email: &str) -> Result<Vec<Consultation>, AuthError> {
        self.get_json("/consultation", &[("email", email)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;
    use crate::testing::{MockServer, Scripted, PASSWORD};

    fn client(server: &Arc<MockServer>) -> ApiClient {
        let credentials = Arc::new(CredentialTransport::new(
            server.clone(),
            Session::new(),
            Endpoints::default(),
        ));
        ApiClient::new(server.clone(), credentials)
    }

    async fn logged_in(server: &Arc<MockServer>) -> ApiClient {
        let api = client(server);
        api.credentials
            .login("doc@example.com", PASSWORD)
            .await
            .expect("login should succeed");
        api
    }

    #[tokio::test]
    async fn test_anonymous_request_carries_no_credential() {
        let server = MockServer::new();
        server.script("/", Scripted::Status(200, r#"{"status":"Up and running!"}"#.into()));
        let api = client(&server);

        let response = api.execute(ApiRequest::get("/")).await.unwrap();
        assert!(response.is_success());
        assert!(server.requests_to("/")[0].bearer.is_none());
    }

    #[tokio::test]
    async fn test_authenticated_call_succeeds_without_refresh() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        let token = api.session().token().unwrap();

        let response = api.send(ApiRequest::get("/consultation")).await.unwrap();
        assert!(response.is_success());

        let sent = server.requests_to("/consultation");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bearer.as_deref(), Some(token.expose()));
        assert_eq!(server.count("/token/refresh"), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_retried() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.expire_access_token();

        let response = api.send(ApiRequest::get("/consultation")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(server.count("/token/refresh"), 1);

        let sent = server.requests_to("/consultation");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].bearer.as_deref(), Some("token-1"));
        assert_eq!(sent[1].bearer.as_deref(), Some("token-2"));
        assert_eq!(api.session().token().unwrap().expose(), "token-2");
    }

    #[tokio::test]
    async fn test_refresh_rejected_ends_session() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.expire_access_token();
        server.revoke_refresh();

        let err = api.send(ApiRequest::get("/consultation")).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired(_)));
        assert!(err.requires_login());
        assert!(!api.session().is_authenticated());
        assert_eq!(server.count("/consultation"), 1);
        assert_eq!(server.count("/token/refresh"), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_retry() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        // Rejects the original and the retry, whatever token they carry
        server.script("/consultation", Scripted::Status(401, "{}".into()));
        server.script("/consultation", Scripted::Status(401, "{}".into()));
        server.script("/consultation", Scripted::Status(401, "{}".into()));

        let err = api.send(ApiRequest::get("/consultation")).await.unwrap_err();
        assert!(matches!(err, AuthError::Api(ApiError::Unauthorized)));
        assert_eq!(server.count("/consultation"), 2);
        assert_eq!(server.count("/token/refresh"), 1);
        // The refresh itself worked, so the session survives
        assert!(api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_retry_result_is_returned_even_when_it_fails_differently() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.script("/consultation", Scripted::Status(401, "{}".into()));
        server.script("/consultation", Scripted::Status(404, "User not found!".into()));

        let err = api.send(ApiRequest::get("/consultation")).await.unwrap_err();
        assert!(matches!(err, AuthError::Api(ApiError::NotFound(_))));
        assert_eq!(server.count("/token/refresh"), 1);
    }

    #[tokio::test]
    async fn test_refresh_request_never_refreshes_itself() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.revoke_refresh();

        let err = api.execute(ApiRequest::post("/token/refresh")).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired(ApiError::Unauthorized)));
        assert_eq!(server.count("/token/refresh"), 1);
        assert!(!api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_relative_refresh_path_never_refreshes_itself() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.script("token/refresh", Scripted::Status(401, "{}".into()));
        server.script("/token/refresh?retry=1", Scripted::Status(401, "{}".into()));

        let err = api.execute(ApiRequest::post("token/refresh")).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired(ApiError::Unauthorized)));
        assert!(!api.session().is_authenticated());

        let err = api
            .execute(ApiRequest::post("/token/refresh?retry=1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired(ApiError::Unauthorized)));

        // Neither rejection led to a follow-up refresh on the canonical path
        assert_eq!(server.count("/token/refresh"), 0);
        assert_eq!(server.count("token/refresh"), 1);
        assert_eq!(server.count("/token/refresh?retry=1"), 1);
    }

    #[tokio::test]
    async fn test_non_auth_failures_pass_through() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.script("/diagnosis", Scripted::Status(503, "maintenance".into()));
        server.script("/consultation", Scripted::NetworkFailure);

        let response = api.execute(ApiRequest::get("/diagnosis")).await.unwrap();
        assert_eq!(response.status.as_u16(), 503);

        let err = api.execute(ApiRequest::get("/consultation")).await.unwrap_err();
        assert!(matches!(err, AuthError::Api(ApiError::Network(_))));

        assert_eq!(server.count("/token/refresh"), 0);
        assert!(api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_refresh() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.expire_access_token();

        let calls = (0..3).map(|_| api.send(ApiRequest::get("/consultation")));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(server.count("/token/refresh"), 1);
        assert!(server
            .requests_to("/consultation")
            .iter()
            .skip(3)
            .all(|r| r.bearer.as_deref() == Some("token-2")));
    }

    #[tokio::test]
    async fn test_concurrent_failures_after_refresh_failure() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.expire_access_token();
        server.revoke_refresh();

        let calls = (0..2).map(|_| api.send(ApiRequest::get("/consultation")));
        let results = futures::future::join_all(calls).await;

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(AuthError::SessionExpired(_)))));
        assert_eq!(server.count("/token/refresh"), 1);
        assert!(!api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_concurrent_anonymous_failures_share_one_refresh() {
        let server = MockServer::new();
        let api = client(&server);

        let calls = (0..3).map(|_| api.send(ApiRequest::get("/consultation")));
        let results = futures::future::join_all(calls).await;

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(AuthError::SessionExpired(_)))));
        assert_eq!(server.count("/consultation"), 3);
        assert_eq!(server.count("/token/refresh"), 1);
        assert!(!api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_retry_abandoned_after_teardown() {
        let server = MockServer::new();
        let api = logged_in(&server).await;
        server.expire_access_token();

        let call = api.send(ApiRequest::get("/consultation"));
        tokio::pin!(call);
        // First poll: original request in flight
        assert!(futures::poll!(&mut call).is_pending());
        // Second poll: 401 received, refresh in flight
        assert!(futures::poll!(&mut call).is_pending());
        assert_eq!(server.count("/token/refresh"), 1);

        api.session().invalidate();
        let err = call.await.unwrap_err();
        assert!(matches!(err, AuthError::Superseded));
        assert!(!api.session().is_authenticated());
        assert_eq!(server.count("/consultation"), 1);
    }

    #[tokio::test]
    async fn test_typed_calls() {
        let server = MockServer::new();
        server.respond_with(
            "/diagnosis",
            r#"[{"chapter_code":"A","category_code":"01","subcategory_code":"X","title":"Typhoid and paratyphoid fevers","description":""}]"#,
        );
        server.respond_with(
            "/consultation",
            r#"{"note_id":1,"email":"doc@example.com","title":"Visit","content":"Fever","codes":[]}"#,
        );
        let api = logged_in(&server).await;

        let codes = api.search_diagnosis("A", "01", "").await.unwrap();
        assert_eq!(codes[0].code(), "A01");

        let query = &server.requests_to("/diagnosis")[0];
        assert_eq!(query.method, reqwest::Method::GET);

        let note = NewConsultation {
            email: "doc@example.com".into(),
            title: "Visit".into(),
            content: "Fever".into(),
            codes: vec![],
        };
        let saved = api.save_consultation(&note).await.unwrap();
        assert_eq!(saved.note_id, 1);
        let posted = &server.requests_to("/consultation")[0];
        assert!(matches!(posted.body, crate::api::RequestBody::Json(_)));
    }
}
