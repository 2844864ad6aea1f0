use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Durable string key/value entries, the desktop stand-in for a browser's
/// `localStorage`. Values are opaque text; the `*_json` helpers cover the
/// common serialize-on-write / parse-on-read case.
#[derive(Clone)]
pub struct LocalStorage {
    db: Database,
}

impl LocalStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Storage backed by a fresh in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM local_storage WHERE key = ?1")?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_helpers::get(row, 0, "local_storage", "value")?)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self, value), fields(len = value.len()))]
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )?;
            Ok(())
        })
    }

    /// Remove an entry. Removing a missing key is not an error.
    #[instrument(skip(self))]
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM local_storage WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM local_storage ORDER BY key")?;
            let mut rows = stmt.query([])?;
            let mut keys = Vec::new();
            while let Some(row) = rows.next()? {
                keys.push(row_helpers::get(row, 0, "local_storage", "key")?);
            }
            Ok(keys)
        })
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(raw) => row_helpers::parse_json(&raw, "local_storage", "value").map(Some),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        theme: String,
    }

    #[test]
    fn missing_key_is_none() {
        let storage = LocalStorage::in_memory().unwrap();
        assert_eq!(storage.get("user").unwrap(), None);
    }

    #[test]
    fn set_overwrites_previous_value() {
        let storage = LocalStorage::in_memory().unwrap();
        storage.set("user", "a").unwrap();
        storage.set("user", "b").unwrap();
        assert_eq!(storage.get("user").unwrap().as_deref(), Some("b"));
        assert_eq!(storage.keys().unwrap(), vec!["user".to_string()]);
    }

    #[test]
    fn remove_is_idempotent() {
        let storage = LocalStorage::in_memory().unwrap();
        storage.set("user", "a").unwrap();
        storage.remove("user").unwrap();
        storage.remove("user").unwrap();
        assert_eq!(storage.get("user").unwrap(), None);
    }

    #[test]
    fn json_helpers() {
        let storage = LocalStorage::in_memory().unwrap();
        storage.set_json("prefs", &Prefs { theme: "dark".into() }).unwrap();
        let prefs: Option<Prefs> = storage.get_json("prefs").unwrap();
        assert_eq!(prefs, Some(Prefs { theme: "dark".into() }));
    }

    #[test]
    fn corrupt_json_is_reported() {
        let storage = LocalStorage::in_memory().unwrap();
        storage.set("prefs", "{not json").unwrap();
        let result: Result<Option<Prefs>, _> = storage.get_json("prefs");
        assert!(matches!(result, Err(StoreError::CorruptRow { .. })));
    }

    #[test]
    fn survives_reopen() {
        let dir = std::env::temp_dir().join(format!("taskdeck-ls-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("local-storage.db");
        {
            let storage = LocalStorage::new(Database::open(&path).unwrap());
            storage.set("user", r#"{"user":null}"#).unwrap();
        }
        let storage = LocalStorage::new(Database::open(&path).unwrap());
        assert_eq!(storage.get("user").unwrap().as_deref(), Some(r#"{"user":null}"#));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
