//! Data models shared by the session manager and its callers.
//!
//! - `UserSnapshot`, `Role`: the cached identity of the logged-in user
//! - `LoginData`: what a successful login hands back to the caller

pub mod user;

pub use user::{LoginData, Role, UserSnapshot};
