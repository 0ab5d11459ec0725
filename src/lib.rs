//! Authenticated per-user file storage over a shared S3 bucket, with identity
//! delegated to a Keycloak realm.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
