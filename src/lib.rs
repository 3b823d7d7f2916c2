pub mod error;
pub mod karma;
pub mod models;
pub mod openapi;
pub mod rate_limit;
pub mod repo;
pub mod report;
pub mod routes;
pub mod transport;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppConfig, AppState};
