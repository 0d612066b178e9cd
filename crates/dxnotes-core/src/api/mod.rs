//! REST API client module for the notes service.
//!
//! This module provides the `ApiClient` request pipeline, the
//! `HttpTransport` seam with its reqwest implementation, and the request,
//! response and error types shared by both.
//!
//! The API uses bearer token authentication obtained from the `/token`
//! endpoint and renewed through `/token/refresh`.

pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::{normalize_path, ApiRequest, ApiResponse, RequestBody};
pub use transport::{HttpTransport, ReqwestTransport};
