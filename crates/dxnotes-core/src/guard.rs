//! Navigation guard.
//!
//! Each view declares an [`AccessPolicy`]. Before a transition the guard
//! compares that policy with the session and either lets the transition
//! through or replaces it with a redirect.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::normalize_path;
use crate::auth::Session;
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPolicy {
    Public,
    RequiresAuth,
    GuestOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    LoginRequired,
    AlreadyAuthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    Redirect { to: String, reason: RedirectReason },
}

impl NavigationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, NavigationDecision::Allow)
    }
}

/// Pure guard rule: which redirect, if any, applies to `policy`
pub fn redirect_for(policy: AccessPolicy, authenticated: bool) -> Option<RedirectReason> {
    match (policy, authenticated) {
        (AccessPolicy::RequiresAuth, false) => Some(RedirectReason::LoginRequired),
        (AccessPolicy::GuestOnly, true) => Some(RedirectReason::AlreadyAuthenticated),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub path: String,
    pub policy: AccessPolicy,
}

impl Route {
    pub fn new(name: &str, path: &str, policy: AccessPolicy) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            policy,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Login, diagnosis search and consultation views
    pub fn standard(login_route: &str) -> Self {
        Self::new(vec![
            Route::new("login", login_route, AccessPolicy::GuestOnly),
            Route::new("search", "/", AccessPolicy::RequiresAuth),
            Route::new("consultations", "/consultations", AccessPolicy::RequiresAuth),
        ])
    }

    /// Match ignoring any query string and trailing slash
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        let path = normalize_path(path);
        self.routes.iter().find(|r| normalize_path(&r.path) == path)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Unknown paths are public
    pub fn policy_for(&self, path: &str) -> AccessPolicy {
        self.resolve(path)
            .map(|r| r.policy)
            .unwrap_or(AccessPolicy::Public)
    }
}

#[derive(Debug, Clone)]
pub struct NavigationGuard {
    session: Session,
    routes: RouteTable,
    login_route: String,
    landing_route: String,
}

impl NavigationGuard {
    pub fn new(session: Session, routes: RouteTable, login_route: &str, landing_route: &str) -> Self {
        Self {
            session,
            routes,
            login_route: login_route.to_string(),
            landing_route: landing_route.to_string(),
        }
    }

    pub fn from_config(session: Session, config: &Config) -> Self {
        Self::new(
            session,
            RouteTable::standard(&config.login_route),
            &config.login_route,
            &config.landing_route,
        )
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide a transition to a view with the given policy
    pub fn check(&self, policy: AccessPolicy) -> NavigationDecision {
        match redirect_for(policy, self.session.is_authenticated()) {
            None => NavigationDecision::Allow,
            Some(reason) => {
                let to = match reason {
                    RedirectReason::LoginRequired => self.login_route.clone(),
                    RedirectReason::AlreadyAuthenticated => self.landing_route.clone(),
                };
                NavigationDecision::Redirect { to, reason }
            }
        }
    }

    /// Decide a transition to `path`, looking its policy up in the route table
    pub fn guard_path(&self, path: &str) -> NavigationDecision {
        let decision = self.check(self.routes.policy_for(path));
        if let NavigationDecision::Redirect { ref to, reason } = decision {
            debug!(from = path, to = %to, ?reason, "Navigation redirected");
        }
        decision
    }
}
