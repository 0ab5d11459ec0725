pub mod file_service;
pub mod identity_gateway;
pub mod object_backend;
pub mod token_inspector;
