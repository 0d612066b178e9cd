//! Session continuity for the dxnotes client.
//!
//! Keeps the user's access token in memory, renews it transparently when the
//! server rejects it, and decides which views the user may navigate to.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use dxnotes_core::{Config, SessionContext};
//!
//! let ctx = SessionContext::new(&Config::load()?)?;
//! if !ctx.restore().await {
//!     ctx.login("doc@example.com", "secret").await?;
//! }
//! let codes = ctx.api().search_diagnosis("A", "01", "").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod guard;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
pub use auth::{AccessToken, AuthError, CredentialTransport, Session, SessionState};
pub use config::{Config, Endpoints};
pub use context::SessionContext;
pub use guard::{AccessPolicy, NavigationDecision, NavigationGuard, RedirectReason, Route, RouteTable};
