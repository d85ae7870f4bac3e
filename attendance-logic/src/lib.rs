pub mod auth;
pub mod cache;
pub mod clients;
pub mod error;
pub mod eta;
pub mod geo;
pub mod metrics;
pub mod realtime;
pub mod repository;
pub mod services;
pub mod settings;
pub mod types;

pub use error::ServiceError;
