use std::sync::Arc;

use tracing::{info, instrument};

use taskdeck_core::backend::{AuthApi, Backend, TaskTable};
use taskdeck_core::ids::UserId;
use taskdeck_remote::{RestBackend, SecretBox, TokenVault};
use taskdeck_store::{Database, LocalStorage};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::router::{Navigation, Route, Router};
use crate::session::SessionStore;
use crate::tasks::{SyncOutcome, TaskStore};

/// The wired-up application: one backend shared by the session store, the
/// task store and the router's guard.
pub struct App {
    storage: LocalStorage,
    session: SessionStore,
    tasks: TaskStore,
    router: Router,
}

impl App {
    /// Open local storage under the configured home, connect to the hosted
    /// backend and rehydrate the persisted session.
    pub fn bootstrap(config: &AppConfig) -> Result<Self, AppError> {
        let remote = config.remote()?;
        let storage = LocalStorage::new(Database::open(&config.storage_path())?);
        let sealer = SecretBox::load_or_create(&config.key_path())?;
        let vault = TokenVault::new(storage.clone(), sealer, &remote.url);
        info!(url = %remote.url, home = %config.home.display(), "starting");
        let backend = RestBackend::new(remote)?.with_vault(vault);
        Ok(Self::with_backend(Arc::new(backend), storage))
    }

    /// Wire the stores and router around any backend.
    pub fn with_backend<B: Backend + 'static>(backend: Arc<B>, storage: LocalStorage) -> Self {
        let auth: Arc<dyn AuthApi> = backend.clone();
        let table: Arc<dyn TaskTable> = backend;
        Self {
            session: SessionStore::new(auth.clone(), storage.clone()),
            tasks: TaskStore::new(table),
            router: Router::new(auth),
            storage,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn current_user_id(&self) -> Option<UserId> {
        self.session.current().map(|user| user.id)
    }

    /// Navigate to the dashboard. When the guard lets us in, refresh the
    /// session and load that user's tasks.
    #[instrument(skip(self))]
    pub async fn open_dashboard(&self) -> Result<Navigation, AppError> {
        let nav = self.router.navigate(Route::Dashboard.path()).await;
        if !matches!(nav, Navigation::Allowed(_)) {
            return Ok(nav);
        }
        let Some(user) = self.session.fetch_session().await? else {
            // Signed out between the guard's check and ours.
            return Ok(self.router.navigate(Route::Auth.path()).await);
        };
        match self.tasks.load_all_for_user(&user.id).await {
            SyncOutcome::Failed(e) => Err(e.into()),
            _ => Ok(nav),
        }
    }

    /// Sign out, drop the task list and go back to the sign-in screen.
    /// Local state is cleared even when the backend call fails.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), AppError> {
        let result = self.session.sign_out().await;
        self.tasks.clear();
        self.router.navigate(Route::Auth.path()).await;
        result.map_err(AppError::from)
    }
}
