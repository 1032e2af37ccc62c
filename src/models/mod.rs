//! Data models for the authentication endpoints

mod auth;
mod user;

pub use auth::*;
pub use user::*;
