use secrecy::SecretString;

/// Public project key sent as the `apikey` header on every backend request.
#[derive(Clone)]
pub struct AnonKey(pub SecretString);

impl std::fmt::Debug for AnonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AnonKey([REDACTED])")
    }
}

impl From<String> for AnonKey {
    fn from(s: String) -> Self {
        Self(SecretString::from(s))
    }
}

/// Email/password pair for sign-in and sign-up.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Session tokens issued by the auth backend.
#[derive(Clone)]
pub struct AuthTokens {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Unix timestamp in milliseconds when access_token expires.
    pub expires_at: i64,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Environment variable names read at startup.
pub mod env_vars {
    pub const TASKDECK_URL: &str = "TASKDECK_URL";
    pub const TASKDECK_ANON_KEY: &str = "TASKDECK_ANON_KEY";
    pub const TASKDECK_HOME: &str = "TASKDECK_HOME";
    pub const TASKDECK_LOG: &str = "TASKDECK_LOG";
}
