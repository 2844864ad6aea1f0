use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use taskdeck_core::backend::{AuthApi, Filter, TaskTable};
use taskdeck_core::errors::BackendError;
use taskdeck_core::identity::Identity;
use taskdeck_core::security::{AnonKey, AuthTokens, Credentials};
use taskdeck_core::tasks::{NewTask, Task, TaskPatch};

use crate::auth::{self, SessionResponse, SignUpResponse, TokenVault};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TABLE: &str = "tasks";

/// Where and how to reach the hosted backend.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `https://xyzcompany.supabase.co`.
    pub url: String,
    pub anon_key: AnonKey,
    pub table: String,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: AnonKey) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key,
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

/// HTTP client for the hosted auth server (`/auth/v1`) and the REST table
/// API (`/rest/v1`).
///
/// Holds the current session tokens and, when given a [`TokenVault`], keeps
/// them persisted across processes. No request is retried; the only timeout
/// is on establishing the TCP connection.
pub struct RestBackend {
    client: Client,
    config: RemoteConfig,
    tokens: Arc<RwLock<Option<AuthTokens>>>,
    vault: Option<TokenVault>,
}

impl RestBackend {
    pub fn new(config: RemoteConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            tokens: Arc::new(RwLock::new(None)),
            vault: None,
        })
    }

    /// Persist tokens through `vault`, resuming any session already stored.
    pub fn with_vault(mut self, vault: TokenVault) -> Self {
        let restored = vault.load();
        if restored.is_some() {
            debug!("resumed persisted backend session");
        }
        self.tokens = Arc::new(RwLock::new(restored));
        self.vault = Some(vault);
        self
    }

    pub async fn has_session(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.url, path)
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.url, self.config.table)
    }

    fn with_api_key(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", self.config.anon_key.0.expose_secret())
            .header("accept", "application/json")
    }

    async fn store_tokens(&self, tokens: AuthTokens) {
        if let Some(vault) = &self.vault {
            if let Err(e) = vault.save(&tokens) {
                warn!(error = %e, "failed to persist auth tokens");
            }
        }
        *self.tokens.write().await = Some(tokens);
    }

    async fn drop_tokens(&self) {
        *self.tokens.write().await = None;
        if let Some(vault) = &self.vault {
            if let Err(e) = vault.clear() {
                warn!(error = %e, "failed to clear persisted auth tokens");
            }
        }
    }

    /// Send a request and turn non-2xx statuses into `BackendError`.
    async fn send(&self, req: RequestBuilder) -> Result<Response, BackendError> {
        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::from_status(status.as_u16(), auth::error_message(&body)))
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
        resp.json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// Exchange the refresh token for a new session. Any rejection of the
    /// refresh token is reported as `Unauthorized`.
    ///
    /// With `rejected` set, the refresh happens even before expiry unless the
    /// stored access token has already moved past the rejected one.
    async fn refresh(&self, rejected: Option<&SecretString>) -> Result<SecretString, BackendError> {
        let mut guard = self.tokens.write().await;
        let Some(current) = guard.as_ref() else {
            return Err(BackendError::SessionMissing);
        };
        // Another caller may have refreshed while we waited for the lock.
        let stale = match rejected {
            Some(token) => current.access_token.expose_secret() == token.expose_secret(),
            None => auth::needs_refresh(current),
        };
        if !stale {
            return Ok(current.access_token.clone());
        }

        let req = self
            .with_api_key(self.client.post(self.auth_url("token")))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({
                "refresh_token": current.refresh_token.expose_secret(),
            }));
        let resp = self.send(req).await.map_err(|e| match e {
            BackendError::InvalidRequest(msg) | BackendError::Unauthorized(msg) => {
                BackendError::Unauthorized(msg)
            }
            other => other,
        })?;
        let session: SessionResponse = Self::decode(resp).await?;
        let tokens = session.tokens();
        let access = tokens.access_token.clone();
        if let Some(vault) = &self.vault {
            if let Err(e) = vault.save(&tokens) {
                warn!(error = %e, "failed to persist refreshed auth tokens");
            }
        }
        *guard = Some(tokens);
        debug!("refreshed backend session");
        Ok(access)
    }

    /// Current access token, refreshed first when close to expiry.
    /// `Ok(None)` means there is no usable session.
    async fn access_token(&self) -> Result<Option<SecretString>, BackendError> {
        {
            let guard = self.tokens.read().await;
            match guard.as_ref() {
                None => return Ok(None),
                Some(tokens) if !auth::needs_refresh(tokens) => {
                    return Ok(Some(tokens.access_token.clone()))
                }
                Some(_) => {}
            }
        }
        match self.refresh(None).await {
            Ok(access) => Ok(Some(access)),
            Err(e) if e.is_auth_failure() => {
                warn!(error_kind = e.error_kind(), "session could not be refreshed, signing out locally");
                self.drop_tokens().await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Bearer for table requests: the user's access token, or the anon key
    /// when signed out.
    async fn table_bearer(&self) -> Result<String, BackendError> {
        Ok(match self.access_token().await? {
            Some(access) => access.expose_secret().to_string(),
            None => self.config.anon_key.0.expose_secret().to_string(),
        })
    }

    async fn fetch_user(&self, access: &SecretString) -> Result<Identity, BackendError> {
        let req = self
            .with_api_key(self.client.get(self.auth_url("user")))
            .bearer_auth(access.expose_secret());
        let resp = self.send(req).await?;
        Self::decode(resp).await
    }

    async fn table_request(&self, req: RequestBuilder) -> Result<Response, BackendError> {
        let bearer = self.table_bearer().await?;
        self.send(self.with_api_key(req).bearer_auth(bearer)).await
    }
}

#[async_trait]
impl AuthApi for RestBackend {
    #[instrument(skip(self))]
    async fn get_user(&self) -> Result<Option<Identity>, BackendError> {
        let Some(access) = self.access_token().await? else {
            return Ok(None);
        };
        let rejected = match self.fetch_user(&access).await {
            Ok(user) => return Ok(Some(user)),
            // Token revoked or expired server-side ahead of our clock.
            Err(e) if e.is_auth_failure() => e,
            Err(e) => return Err(e),
        };
        debug!(error_kind = rejected.error_kind(), "access token rejected, refreshing");
        let retried = match self.refresh(Some(&access)).await {
            Ok(fresh) => self.fetch_user(&fresh).await,
            Err(e) => Err(e),
        };
        match retried {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_auth_failure() => {
                warn!(error_kind = e.error_kind(), "session could not be restored, signing out locally");
                self.drop_tokens().await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Identity, BackendError> {
        let req = self
            .with_api_key(self.client.post(self.auth_url("token")))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password.expose_secret(),
            }));
        let resp = self.send(req).await.map_err(|e| match e {
            BackendError::InvalidRequest(msg) => BackendError::InvalidCredentials(msg),
            other => other,
        })?;
        let session: SessionResponse = Self::decode(resp).await?;
        self.store_tokens(session.tokens()).await;
        Ok(session.user)
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, BackendError> {
        let req = self
            .with_api_key(self.client.post(self.auth_url("signup")))
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password.expose_secret(),
            }));
        let resp = self.send(req).await?;
        match Self::decode::<SignUpResponse>(resp).await? {
            SignUpResponse::Session(session) => {
                self.store_tokens(session.tokens()).await;
                Ok(session.user)
            }
            SignUpResponse::User(user) => {
                debug!(user_id = %user.id, "sign-up pending email confirmation");
                Ok(user)
            }
        }
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        let access = self.tokens.read().await.as_ref().map(|t| t.access_token.clone());
        let Some(access) = access else {
            return Ok(());
        };
        let req = self
            .with_api_key(self.client.post(self.auth_url("logout")))
            .bearer_auth(access.expose_secret());
        let result = self.send(req).await;
        self.drop_tokens().await;
        match result {
            Ok(_) => Ok(()),
            // Already invalid server-side: nothing left to revoke.
            Err(e) if e.is_auth_failure() || matches!(e, BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TaskTable for RestBackend {
    #[instrument(skip(self), fields(filter = %filter))]
    async fn select(&self, filter: &Filter) -> Result<Vec<Task>, BackendError> {
        let req = self
            .client
            .get(self.table_url())
            .query(&[("select", "*".to_string()), eq_param(filter)]);
        let resp = self.table_request(req).await?;
        Self::decode(resp).await
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert(&self, rows: &[NewTask]) -> Result<Vec<Task>, BackendError> {
        let req = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=representation")
            .query(&[("select", "*")])
            .json(rows);
        let resp = self.table_request(req).await?;
        Self::decode(resp).await
    }

    #[instrument(skip(self, patch), fields(filter = %filter))]
    async fn update(&self, patch: &TaskPatch, filter: &Filter) -> Result<Vec<Task>, BackendError> {
        let req = self
            .client
            .patch(self.table_url())
            .header("Prefer", "return=representation")
            .query(&[("select", "*".to_string()), eq_param(filter)])
            .json(patch);
        let resp = self.table_request(req).await?;
        Self::decode(resp).await
    }

    #[instrument(skip(self), fields(filter = %filter))]
    async fn delete(&self, filter: &Filter) -> Result<(), BackendError> {
        let req = self.client.delete(self.table_url()).query(&[eq_param(filter)]);
        self.table_request(req).await?;
        Ok(())
    }
}

fn eq_param(filter: &Filter) -> (&'static str, String) {
    (filter.column.as_str(), format!("eq.{}", filter.value))
}
