pub mod api;
pub mod config;
pub mod cors;
pub mod error;
pub mod models;
pub mod notifier;
pub mod oauth;
pub mod schema;
pub mod session;
pub mod store;
