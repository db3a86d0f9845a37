//! Shared types for linkgate

pub mod error;

pub use error::{GateError, Result};
