//! Quota ledger
//!
//! Windowed counters for the hourly request limit and the monthly link limit.
//! Counters live in shared storage so every server instance sees the same
//! numbers; the storage backend serializes increments on a single
//! (identifier, type, window) tuple inside one transaction.
//!
//! Verdict rules for a limit `L` and post-increment count `c`:
//! - `L == 0`: unlimited, storage is never touched, `remaining = -1`
//! - `remaining = max(0, L - c)`
//! - `exceeded = c > L`, so the (L+1)-th request of a window is the first
//!   one rejected

pub mod mongo;
pub mod sqlite;
pub mod window;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::types::Result;

pub use mongo::MongoCounterStore;
pub use sqlite::SqliteCounterStore;
pub use window::Window;

/// What an identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Ip,
    User,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Ip => "ip",
            SubjectType::User => "user",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ip" => Ok(SubjectType::Ip),
            "user" => Ok(SubjectType::User),
            other => Err(format!("unknown subject type: {other:?}")),
        }
    }
}

/// Identifies one counter row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKey {
    pub identifier: String,
    pub subject_type: SubjectType,
    pub window: Window,
    pub window_start: DateTime<Utc>,
}

impl CounterKey {
    pub fn new(
        identifier: &str,
        subject_type: SubjectType,
        window: Window,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            subject_type,
            window,
            window_start: window.start(now),
        }
    }
}

/// Durable counter storage
///
/// `increment` must be atomic with respect to concurrent callers on the same
/// key, including callers in other processes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create the row with count 1 or add 1 to it; returns the new count
    async fn increment(&self, key: &CounterKey) -> Result<u64>;

    /// Current count, 0 when no row exists. Never creates a row.
    async fn peek(&self, key: &CounterKey) -> Result<u64>;

    /// Delete rows of `window` whose start is strictly before `cutoff`
    async fn delete_before(&self, window: Window, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// Configured limit, 0 = unlimited
    pub limit: u64,
    /// Requests left in the window, -1 when unlimited
    pub remaining: i64,
    /// When the current window ends
    pub reset: DateTime<Utc>,
    pub exceeded: bool,
}

impl QuotaStatus {
    pub fn unlimited(reset: DateTime<Utc>) -> Self {
        Self {
            limit: 0,
            remaining: -1,
            reset,
            exceeded: false,
        }
    }

    pub fn from_count(limit: u64, count: u64, reset: DateTime<Utc>) -> Self {
        let remaining = limit.saturating_sub(count);
        Self {
            limit,
            remaining: i64::try_from(remaining).unwrap_or(i64::MAX),
            reset,
            exceeded: count > limit,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }

    /// Seconds until the window resets, at least 1
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let secs = (self.reset - now).num_seconds();
        u64::try_from(secs).unwrap_or(0).max(1)
    }

    /// Write `X-RateLimit-*` headers, plus `Retry-After` when exceeded
    pub fn apply_headers(&self, headers: &mut HeaderMap, now: DateTime<Utc>) {
        if self.is_unlimited() {
            return;
        }
        let pairs = [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.timestamp().to_string()),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        if self.exceeded {
            headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs(now)));
        }
    }
}

/// Check-and-increment ledger over a `CounterStore`
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn CounterStore>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count one request against the hourly window
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        subject_type: SubjectType,
        limit: u64,
    ) -> Result<QuotaStatus> {
        self.check_and_increment(identifier, subject_type, Window::Hourly, limit)
            .await
    }

    /// Count one created link against the monthly window
    pub async fn check_monthly_link_limit(
        &self,
        identifier: &str,
        subject_type: SubjectType,
        limit: u64,
    ) -> Result<QuotaStatus> {
        self.check_and_increment(identifier, subject_type, Window::Monthly, limit)
            .await
    }

    pub async fn check_and_increment(
        &self,
        identifier: &str,
        subject_type: SubjectType,
        window: Window,
        limit: u64,
    ) -> Result<QuotaStatus> {
        self.check_and_increment_at(identifier, subject_type, window, limit, Utc::now())
            .await
    }

    pub async fn check_and_increment_at(
        &self,
        identifier: &str,
        subject_type: SubjectType,
        window: Window,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<QuotaStatus> {
        let reset = window.reset(now);
        if limit == 0 {
            return Ok(QuotaStatus::unlimited(reset));
        }

        let key = CounterKey::new(identifier, subject_type, window, now);
        let count = self.store.increment(&key).await?;
        let status = QuotaStatus::from_count(limit, count, reset);

        debug!(
            %window,
            subject_type = %subject_type,
            count,
            limit,
            exceeded = status.exceeded,
            "quota counter incremented"
        );

        Ok(status)
    }

    /// Read-only view of a counter, for status displays
    pub async fn peek(
        &self,
        identifier: &str,
        subject_type: SubjectType,
        window: Window,
        limit: u64,
    ) -> Result<QuotaStatus> {
        self.peek_at(identifier, subject_type, window, limit, Utc::now())
            .await
    }

    pub async fn peek_at(
        &self,
        identifier: &str,
        subject_type: SubjectType,
        window: Window,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<QuotaStatus> {
        let reset = window.reset(now);
        if limit == 0 {
            return Ok(QuotaStatus::unlimited(reset));
        }

        let key = CounterKey::new(identifier, subject_type, window, now);
        let count = self.store.peek(&key).await?;
        Ok(QuotaStatus::from_count(limit, count, reset))
    }

    /// Remove counters whose window started before `now - retention`.
    /// The window containing `now` is never removed, whatever the retention.
    pub async fn cleanup(&self, retention: TimeDelta) -> Result<u64> {
        self.cleanup_at(retention, Utc::now()).await
    }

    pub async fn cleanup_at(&self, retention: TimeDelta, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0;
        for window in [Window::Hourly, Window::Monthly] {
            let cutoff = cleanup_cutoff(window, retention, now);
            removed += self.store.delete_before(window, cutoff).await?;
        }
        Ok(removed)
    }
}

/// Deletion horizon for one window kind, clamped to the current window start
fn cleanup_cutoff(window: Window, retention: TimeDelta, now: DateTime<Utc>) -> DateTime<Utc> {
    (now - retention).min(window.start(now))
}
