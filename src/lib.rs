//! linkgate - authentication, authorization and quota core for a link shortener
//!
//! Given a request's headers and peer address, linkgate decides who is
//! calling, whether they may do what they ask, and whether their plan still
//! has room for it.
//!
//! ## Components
//!
//! - **Auth**: bearer tokens (HS256/RS256), API keys, argon2id secrets,
//!   principal resolution, scopes and the pluggable token validation modes
//! - **Plans**: tier limits (hourly requests, monthly links)
//! - **Quota**: windowed counters in SQLite or MongoDB, safe across instances
//! - **Gate**: the whole admission decision in one call

pub mod auth;
pub mod config;
pub mod db;
pub mod gate;
pub mod logging;
pub mod plans;
pub mod quota;
pub mod types;

pub use config::Args;
pub use gate::{Admission, Gate};
pub use types::{GateError, Result};
