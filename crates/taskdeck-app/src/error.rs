use taskdeck_core::errors::BackendError;
use taskdeck_remote::auth::VaultError;
use taskdeck_remote::secrets::SecretError;
use taskdeck_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("secret key error: {0}")]
    Secret(#[from] SecretError),

    #[error("configuration error: {0}")]
    Config(String),
}
