//! Middleware for the korder API

pub mod auth;

pub use auth::{admin_auth_middleware, kiosk_auth_middleware, Principal};
