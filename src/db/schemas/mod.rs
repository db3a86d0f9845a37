//! Database schemas for linkgate
//!
//! Defines MongoDB document structures for users, API keys and quota counters.

mod api_key;
mod counter;
mod metadata;
mod user;

pub use api_key::{ApiKeyDoc, API_KEY_COLLECTION};
pub use counter::{CounterDoc, MONTHLY_LINK_LIMIT_COLLECTION, RATE_LIMIT_COLLECTION};
pub use metadata::Metadata;
pub use user::{UserDoc, USER_COLLECTION};
