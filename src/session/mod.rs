//! Session management.
//!
//! Sessions and login contexts live entirely in sealed cookies; there is no
//! server-side session table.

pub mod context;
pub mod manager;
pub mod seal;

pub use context::AuthRequestContext;
pub use manager::{Session, SessionManager};
pub use seal::{CookieSealer, SealPurpose};
