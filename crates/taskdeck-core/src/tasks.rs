use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Incomplete,
    Complete,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incomplete" => Ok(Self::Incomplete),
            "complete" => Ok(Self::Complete),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A row of the remote `tasks` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub user_id: UserId,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Server-computed columns the client does not model (e.g. `created_at`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Shallow-merge a row returned by the backend over this one.
    ///
    /// Modelled columns are taken from `row`; extra columns present in `row`
    /// overwrite ours and extra columns only we have are kept.
    pub fn merge(&mut self, row: Task) {
        self.id = row.id;
        self.name = row.name;
        self.status = row.status;
        self.user_id = row.user_id;
        self.due_date = row.due_date;
        self.extra.extend(row.extra);
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }
}

/// Insert payload: the columns the client chooses. `id` and timestamps are
/// assigned by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub status: TaskStatus,
    pub user_id: UserId,
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, user_id: UserId, due_date: Option<NaiveDate>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Incomplete,
            user_id,
            due_date,
        }
    }
}

/// Partial update. Unset fields are omitted from the request body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.status.is_none() && self.due_date.is_none()
    }
}
