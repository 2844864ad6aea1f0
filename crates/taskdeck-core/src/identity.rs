use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// The authenticated user as reported by the auth backend.
///
/// Only `id` and `email` are interpreted; every other field the backend
/// returns (`aud`, `role`, `user_metadata`, timestamps...) is carried in
/// `extra` so a persisted identity reproduces what the backend sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: Some(email.into()),
            extra: serde_json::Map::new(),
        }
    }
}
