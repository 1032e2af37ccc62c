//! Authentication for the business API
//!
//! Credentials are obtained with a username/password login and kept alive
//! by the single-flight refresh coordinator in [`refresh`].

pub mod login;
pub mod refresh;
pub mod tokens;

pub use login::{login, logout, refresh_session, status};
pub use tokens::{MemoryTokenStore, Session, StoredToken, TokenStore};
