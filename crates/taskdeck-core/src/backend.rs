use async_trait::async_trait;

use crate::errors::BackendError;
use crate::identity::Identity;
use crate::ids::{TaskId, UserId};
use crate::security::Credentials;
use crate::tasks::{NewTask, Task, TaskPatch};

/// Columns of the `tasks` table that the client filters on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Column {
    Id,
    UserId,
}

impl Column {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::UserId => "user_id",
        }
    }
}

/// Equality predicate on one column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: Column,
    pub value: String,
}

impl Filter {
    pub fn id(id: TaskId) -> Self {
        Self {
            column: Column::Id,
            value: id.to_string(),
        }
    }

    pub fn user_id(user_id: &UserId) -> Self {
        Self {
            column: Column::UserId,
            value: user_id.as_str().to_string(),
        }
    }

    /// Whether a row satisfies this predicate.
    pub fn matches(&self, task: &Task) -> bool {
        match self.column {
            Column::Id => task.id.to_string() == self.value,
            Column::UserId => task.user_id.as_str() == self.value,
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=eq.{}", self.column.as_str(), self.value)
    }
}

/// Auth half of the hosted backend.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Identity behind the current backend session, `None` when signed out
    /// or when the session is no longer accepted by the server.
    async fn get_user(&self) -> Result<Option<Identity>, BackendError>;

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Identity, BackendError>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Row-oriented access to the `tasks` table.
#[async_trait]
pub trait TaskTable: Send + Sync {
    async fn select(&self, filter: &Filter) -> Result<Vec<Task>, BackendError>;

    /// Insert rows and return them as stored (with server-assigned columns).
    async fn insert(&self, rows: &[NewTask]) -> Result<Vec<Task>, BackendError>;

    /// Apply `patch` to every row matching `filter`, returning the updated rows.
    async fn update(&self, patch: &TaskPatch, filter: &Filter) -> Result<Vec<Task>, BackendError>;

    async fn delete(&self, filter: &Filter) -> Result<(), BackendError>;
}

/// A backend that provides both auth and the task table.
pub trait Backend: AuthApi + TaskTable {}

impl<T: AuthApi + TaskTable + ?Sized> Backend for T {}
