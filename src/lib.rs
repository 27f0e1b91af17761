pub mod billing;
pub mod config;
pub mod email;
pub mod error;
pub mod notifications;
pub mod routes;
