use std::path::PathBuf;

use taskdeck_core::security::{env_vars, AnonKey};
use taskdeck_remote::RemoteConfig;

use crate::error::AppError;

/// Runtime configuration. Built from defaults, then environment variables,
/// then command-line flags (applied by the binary).
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Backend project URL.
    pub url: Option<String>,
    pub anon_key: Option<AnonKey>,
    /// Data directory for local storage, the key file and the log database.
    pub home: PathBuf,
    /// Log level directive, e.g. `info` or `warn,taskdeck_remote=debug`.
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            home: default_home(),
            log_level: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::default().with_env(|name| std::env::var(name).ok())
    }

    /// Overlay values found through `lookup`. Empty values are ignored.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(env_vars::TASKDECK_URL) {
            self.url = Some(url);
        }
        if let Some(key) = get(env_vars::TASKDECK_ANON_KEY) {
            self.anon_key = Some(AnonKey::from(key));
        }
        if let Some(home) = get(env_vars::TASKDECK_HOME) {
            self.home = PathBuf::from(home);
        }
        if let Some(level) = get(env_vars::TASKDECK_LOG) {
            self.log_level = Some(level);
        }
        self
    }

    pub fn storage_path(&self) -> PathBuf {
        self.home.join("local-storage.db")
    }

    pub fn key_path(&self) -> PathBuf {
        self.home.join("secret_key")
    }

    pub fn log_db_path(&self) -> PathBuf {
        self.home.join("logs.db")
    }

    /// Backend connection settings. URL and anon key are both required.
    pub fn remote(&self) -> Result<RemoteConfig, AppError> {
        let url = self.url.as_deref().ok_or_else(|| {
            AppError::Config(format!("backend URL not set (use --url or {})", env_vars::TASKDECK_URL))
        })?;
        let key = self.anon_key.clone().ok_or_else(|| {
            AppError::Config(format!(
                "anon key not set (use --anon-key or {})",
                env_vars::TASKDECK_ANON_KEY
            ))
        })?;
        Ok(RemoteConfig::new(url, key))
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".taskdeck")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_live_under_home_dir() {
        let config = AppConfig::default();
        assert!(config.home.ends_with(".taskdeck"));
        assert!(config.storage_path().ends_with("local-storage.db"));
        assert!(config.key_path().ends_with("secret_key"));
        assert!(config.log_db_path().ends_with("logs.db"));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = AppConfig::default().with_env(lookup(&[
            ("TASKDECK_URL", "https://abc.example.co/"),
            ("TASKDECK_ANON_KEY", "anon"),
            ("TASKDECK_HOME", "/var/lib/taskdeck"),
            ("TASKDECK_LOG", "debug"),
        ]));
        assert_eq!(config.home, PathBuf::from("/var/lib/taskdeck"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        let remote = config.remote().unwrap();
        assert_eq!(remote.url, "https://abc.example.co");
        assert_eq!(remote.table, "tasks");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = AppConfig::default().with_env(lookup(&[("TASKDECK_URL", "  ")]));
        assert!(config.url.is_none());
    }

    #[test]
    fn remote_requires_url_and_key() {
        let missing_url = AppConfig::default();
        assert!(matches!(missing_url.remote(), Err(AppError::Config(_))));

        let missing_key = AppConfig {
            url: Some("https://abc.example.co".into()),
            ..AppConfig::default()
        };
        let err = missing_key.remote().unwrap_err();
        assert!(err.to_string().contains("TASKDECK_ANON_KEY"));
    }
}
