use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use taskdeck_core::backend::AuthApi;
use taskdeck_core::errors::BackendError;
use taskdeck_core::identity::Identity;
use taskdeck_core::security::Credentials;
use taskdeck_store::LocalStorage;

/// Local storage key holding the persisted session.
pub const SESSION_KEY: &str = "user";

/// Shape of the persisted value: `{"user": <identity or null>}`.
#[derive(Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default)]
    user: Option<Identity>,
}

/// Who is signed in, mirrored to local storage.
///
/// The cached identity is rehydrated from storage at construction, before
/// any backend call, and rewritten after every change. Persistence failures
/// are logged and never fail the operation that caused them.
pub struct SessionStore {
    auth: Arc<dyn AuthApi>,
    storage: LocalStorage,
    state: watch::Sender<Option<Identity>>,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthApi>, storage: LocalStorage) -> Self {
        let initial = rehydrate(&storage);
        let (state, _) = watch::channel(initial);
        Self {
            auth,
            storage,
            state,
        }
    }

    /// Cached identity, without asking the backend.
    pub fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }

    fn set(&self, user: Option<Identity>) {
        if let Err(e) = self.storage.set_json(SESSION_KEY, &PersistedSession { user: user.clone() }) {
            warn!(error = %e, "failed to persist session");
        }
        self.state.send_replace(user);
    }

    /// Ask the backend who is signed in and cache the answer, which may be
    /// nobody. A backend error is returned and the cache is left alone.
    #[instrument(skip(self))]
    pub async fn fetch_session(&self) -> Result<Option<Identity>, BackendError> {
        let user = self.auth.get_user().await.map_err(|e| {
            warn!(error = %e, error_kind = e.error_kind(), "failed to fetch session");
            e
        })?;
        debug!(signed_in = user.is_some(), "session fetched");
        self.set(user.clone());
        Ok(user)
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, BackendError> {
        let user = self.auth.sign_in_with_password(credentials).await?;
        debug!(user_id = %user.id, "signed in");
        self.set(Some(user.clone()));
        Ok(user)
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, BackendError> {
        let user = self.auth.sign_up(credentials).await?;
        debug!(user_id = %user.id, "signed up");
        self.set(Some(user.clone()));
        Ok(user)
    }

    /// Sign out on the backend. The local session is cleared whatever the
    /// backend answers; its error, if any, is still returned.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        let result = self.auth.sign_out().await;
        if let Err(e) = &result {
            warn!(error = %e, error_kind = e.error_kind(), "backend sign-out failed, clearing local session anyway");
        }
        self.set(None);
        result
    }
}

fn rehydrate(storage: &LocalStorage) -> Option<Identity> {
    match storage.get_json::<PersistedSession>(SESSION_KEY) {
        Ok(Some(persisted)) => persisted.user,
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "discarding unreadable persisted session");
            None
        }
    }
}
