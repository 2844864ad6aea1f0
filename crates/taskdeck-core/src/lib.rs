pub mod backend;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod security;
pub mod tasks;

pub use backend::{AuthApi, Backend, Column, Filter, TaskTable};
pub use errors::BackendError;
pub use identity::Identity;
pub use ids::{TaskId, UserId};
pub use tasks::{NewTask, Task, TaskPatch, TaskStatus};
