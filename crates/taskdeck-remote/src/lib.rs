//! Backend adapters: the hosted auth and table HTTP API, plus an in-memory
//! double for tests.

pub mod auth;
pub mod mock;
pub mod rest;
pub mod secrets;

pub use auth::TokenVault;
pub use mock::{MockBackend, MockOp};
pub use rest::{RemoteConfig, RestBackend};
pub use secrets::SecretBox;
