//! HTTP execution seam.
//!
//! `HttpTransport` performs exactly one exchange and reports the raw status and
//! body. It never interprets status codes; that is the pipeline's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::request::{ApiRequest, ApiResponse, RequestBody};
use super::ApiError;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport.
///
/// The cookie store is enabled so the HTTP-only refresh cookie set by the
/// login endpoint is sent back on refresh and logout automatically.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let ApiRequest {
            method,
            path,
            query,
            headers,
            body,
        } = request;
        let url = self.url(&path);

        let mut builder = self.client.request(method.clone(), &url).headers(headers);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(pairs) => builder.form(&pairs),
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%method, path = %path, status = status.as_u16(), "HTTP exchange complete");

        Ok(ApiResponse { status, body })
    }
}
