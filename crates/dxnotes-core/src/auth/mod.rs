//! Authentication module for managing the user session and credentials.
//!
//! This module provides:
//! - `Session`: In-memory access token and identity with a derived
//!   authenticated flag, observable through a watch channel
//! - `CredentialTransport`: Login, refresh and logout round trips
//! - `AuthError`: Failure modes of the session flows
//!
//! Nothing here is persisted; the refresh credential lives in the HTTP
//! client's cookie store.

pub mod credentials;
pub mod error;
pub mod session;

pub use credentials::CredentialTransport;
pub use error::AuthError;
pub use session::{AccessToken, Session, SessionData, SessionState};
