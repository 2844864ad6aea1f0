use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use taskdeck_core::backend::AuthApi;

/// Screens of the app.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// `/`: the task list. Requires a signed-in user.
    Dashboard,
    /// `/auth`: sign-in and sign-up.
    Auth,
}

impl Route {
    pub const ALL: [Route; 2] = [Route::Dashboard, Route::Auth];

    pub fn path(self) -> &'static str {
        match self {
            Self::Dashboard => "/",
            Self::Auth => "/auth",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.path() == path)
    }

    pub fn requires_auth(self) -> bool {
        matches!(self, Self::Dashboard)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Result of a navigation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    Allowed(Route),
    /// The target needed a signed-in user; navigation ended at `to` instead.
    Redirected { from: Route, to: Route },
    NotFound(String),
}

impl Navigation {
    /// Where the navigation ended, if anywhere.
    pub fn route(&self) -> Option<Route> {
        match self {
            Self::Allowed(route) => Some(*route),
            Self::Redirected { to, .. } => Some(*to),
            Self::NotFound(_) => None,
        }
    }
}

/// Decides whether a navigation may proceed.
///
/// Asks the backend for the current user on every check rather than trusting
/// any cached session, so a session that expired server-side is caught.
pub struct RouteGuard {
    auth: Arc<dyn AuthApi>,
}

impl RouteGuard {
    pub fn new(auth: Arc<dyn AuthApi>) -> Self {
        Self { auth }
    }

    #[instrument(skip(self), fields(route = %target))]
    pub async fn check(&self, target: Route) -> Navigation {
        let signed_in = match self.auth.get_user().await {
            Ok(user) => user.is_some(),
            Err(e) => {
                warn!(error = %e, error_kind = e.error_kind(), "could not verify user, treating as signed out");
                false
            }
        };
        if target.requires_auth() && !signed_in {
            debug!("redirecting to sign-in");
            Navigation::Redirected {
                from: target,
                to: Route::Auth,
            }
        } else {
            Navigation::Allowed(target)
        }
    }
}

/// Tracks the current route; every navigation passes through the guard.
pub struct Router {
    guard: RouteGuard,
    current: Mutex<Option<Route>>,
}

impl Router {
    pub fn new(auth: Arc<dyn AuthApi>) -> Self {
        Self {
            guard: RouteGuard::new(auth),
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<Route> {
        *self.current.lock()
    }

    pub async fn navigate(&self, path: &str) -> Navigation {
        let Some(target) = Route::from_path(path) else {
            debug!(path, "no such route");
            return Navigation::NotFound(path.to_string());
        };
        let outcome = self.guard.check(target).await;
        if let Some(route) = outcome.route() {
            *self.current.lock() = Some(route);
        }
        outcome
    }
}
