//! Counter windows
//!
//! All windows are computed in UTC. Hourly windows start on the hour; monthly
//! windows start at 00:00 on the first day of the month.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counting period of a quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Requests per clock hour
    Hourly,
    /// Links per calendar month
    Monthly,
}

impl Window {
    /// Start of the window containing `now`
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Window::Hourly => {
                let ts = now.timestamp();
                DateTime::from_timestamp(ts - ts.rem_euclid(3600), 0).unwrap_or(now)
            }
            Window::Monthly => first_of_month(now.year(), now.month()).unwrap_or(now),
        }
    }

    /// Start of the window after the one containing `now`
    pub fn reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start(now);
        match self {
            Window::Hourly => start + TimeDelta::hours(1),
            Window::Monthly => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                first_of_month(year, month).unwrap_or(start + TimeDelta::days(31))
            }
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Hourly => write!(f, "hourly"),
            Window::Monthly => write!(f, "monthly"),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}
