pub mod auth;

pub use auth::{AuthContext, AuthState, RefreshPolicy, authenticate, proactive_refresh};
