use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use taskdeck_core::identity::Identity;
use taskdeck_core::security::AuthTokens;
use taskdeck_store::LocalStorage;

use crate::secrets::{SecretBox, SecretError};

/// Refresh this long before the access token actually expires.
pub const TOKEN_EXPIRY_MARGIN_MS: i64 = 60_000;

/// Session payload returned by the password and refresh-token grants.
#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    /// Seconds since the epoch, when the server supplies it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}

impl SessionResponse {
    pub fn tokens(&self) -> AuthTokens {
        let expires_at = match self.expires_at {
            Some(secs) => secs * 1000,
            None => Utc::now().timestamp_millis() + (self.expires_in as i64 * 1000),
        };
        AuthTokens {
            access_token: SecretString::from(self.access_token.clone()),
            refresh_token: SecretString::from(self.refresh_token.clone()),
            expires_at,
        }
    }
}

/// Sign-up answers with a full session, or with the bare user when the
/// project requires email confirmation before the first sign-in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(SessionResponse),
    User(Identity),
}

/// Check if the access token is expired or within the refresh margin.
pub fn needs_refresh(tokens: &AuthTokens) -> bool {
    tokens.expires_at - Utc::now().timestamp_millis() < TOKEN_EXPIRY_MARGIN_MS
}

/// Pull a human-readable message out of an auth or REST error body.
///
/// The auth server uses `msg` / `error_description`, the REST layer uses
/// `message`; anything else is passed through verbatim.
pub fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[derive(Serialize, Deserialize)]
struct PersistedTokens {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

/// Encrypted persistence of backend tokens in local storage, so a later
/// process can resume the session.
#[derive(Clone)]
pub struct TokenVault {
    storage: LocalStorage,
    sealer: SecretBox,
    key: String,
}

impl TokenVault {
    /// Vault entry namespaced by backend URL: `auth-token.<8 hex bytes>`.
    pub fn new(storage: LocalStorage, sealer: SecretBox, backend_url: &str) -> Self {
        Self {
            storage,
            sealer,
            key: storage_key(backend_url),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load persisted tokens. Missing, undecryptable or malformed entries all
    /// read as "no session"; the latter two are logged.
    pub fn load(&self) -> Option<AuthTokens> {
        let sealed = match self.storage.get(&self.key) {
            Ok(Some(sealed)) => sealed,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read persisted auth tokens");
                return None;
            }
        };
        let plain = match self.sealer.open(&sealed) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(error = %e, "discarding unreadable auth tokens");
                return None;
            }
        };
        match serde_json::from_str::<PersistedTokens>(&plain) {
            Ok(p) => Some(AuthTokens {
                access_token: SecretString::from(p.access_token),
                refresh_token: SecretString::from(p.refresh_token),
                expires_at: p.expires_at,
            }),
            Err(e) => {
                warn!(error = %e, "discarding malformed auth tokens");
                None
            }
        }
    }

    pub fn save(&self, tokens: &AuthTokens) -> Result<(), VaultError> {
        let plain = serde_json::to_string(&PersistedTokens {
            access_token: tokens.access_token.expose_secret().to_string(),
            refresh_token: tokens.refresh_token.expose_secret().to_string(),
            expires_at: tokens.expires_at,
        })
        .map_err(|e| VaultError::Storage(e.to_string()))?;
        let sealed = self.sealer.seal(&plain)?;
        self.storage
            .set(&self.key, &sealed)
            .map_err(|e| VaultError::Storage(e.to_string()))
    }

    pub fn clear(&self) -> Result<(), VaultError> {
        self.storage
            .remove(&self.key)
            .map_err(|e| VaultError::Storage(e.to_string()))
    }
}

fn storage_key(backend_url: &str) -> String {
    let digest = Sha256::digest(backend_url.trim_end_matches('/').as_bytes());
    let short: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("auth-token.{short}")
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("storage error: {0}")]
    Storage(String),
}
