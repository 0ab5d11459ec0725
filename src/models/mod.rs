//! Core data models for the file gateway.
//!
//! None of these are persisted by this service: subjects and token pairs come
//! from the identity provider, file records from the object store, and all of
//! them live for a single request.

pub mod file;
pub mod subject;
pub mod token;
