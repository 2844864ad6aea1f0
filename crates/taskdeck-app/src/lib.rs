//! Application layer: session and task stores, routing with an auth guard,
//! and the wiring that connects them to a backend.

pub mod app;
pub mod config;
pub mod error;
pub mod router;
pub mod session;
pub mod tasks;

pub use app::App;
pub use config::AppConfig;
pub use error::AppError;
pub use router::{Navigation, Route, RouteGuard, Router};
pub use session::SessionStore;
pub use tasks::{SyncOutcome, TaskStore};
