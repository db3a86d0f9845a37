//! Quota counter document schema
//!
//! One document per (identifier, type, window_start). The same shape backs
//! the hourly request counters and the monthly link counters.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection for hourly request counters
pub const RATE_LIMIT_COLLECTION: &str = "rate_limits";

/// Collection for monthly link counters
pub const MONTHLY_LINK_LIMIT_COLLECTION: &str = "monthly_link_limits";

/// Counter document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CounterDoc {
    /// Client IP or user id
    pub identifier: String,

    /// "ip" or "user"
    #[serde(rename = "type")]
    pub subject_type: String,

    /// Start of the hour or month this counter covers
    pub window_start: DateTime,

    /// Requests (or links) counted in the window
    pub count: i64,
}

impl IntoIndexes for CounterDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "identifier": 1, "type": 1, "window_start": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("counter_window_unique".to_string())
                        .build(),
                ),
            ),
            // Supports the retention sweep
            (
                doc! { "window_start": 1 },
                Some(
                    IndexOptions::builder()
                        .name("window_start_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
