use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an authenticated user, assigned by the auth backend.
///
/// Opaque to the client (the hosted backend hands out UUID strings, tests
/// use short names like `u1`).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Server-assigned primary key of a row in the `tasks` table.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<i64> for TaskId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_from_raw_preserves_value() {
        let id = UserId::from_raw("8f2b6c1e-0000-4000-8000-000000000001");
        assert_eq!(id.as_str(), "8f2b6c1e-0000-4000-8000-000000000001");
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn user_id_serializes_as_plain_string() {
        let id = UserId::from_raw("u1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""u1""#);
        let parsed: UserId = serde_json::from_str(r#""u1""#).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn task_id_serializes_as_number() {
        let id = TaskId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let parsed: TaskId = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn task_id_parses_from_cli_text() {
        assert_eq!(" 7 ".parse::<TaskId>().unwrap(), TaskId::new(7));
        assert!("seven".parse::<TaskId>().is_err());
    }
}
