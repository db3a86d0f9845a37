//! Audit trail for authentication and quota decisions
//!
//! Events are appended as JSON lines. The logger is a no-op until a file is
//! attached, so callers can log unconditionally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::auth::principal::{Principal, PrincipalKind};
use crate::quota::QuotaStatus;

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Request resolved to a user or service key
    Authenticated,
    /// Request fell back to an anonymous principal
    AnonymousFallback,
    /// An API key was presented and did not match
    ApiKeyRejected,
    /// Service key used outside its scopes
    ScopeDenied,
    /// Hourly request limit exceeded
    RateLimited,
    /// Monthly link limit exceeded
    LinkQuotaExceeded,
    ApiKeyCreated,
    ApiKeyDeleted,
    /// Expired quota counters removed by a cleanup run
    CountersSwept,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_kind: Option<PrincipalKind>,
    /// User id, client IP or key id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            principal_kind: None,
            identifier: None,
            scope: None,
            limit: None,
            reset: None,
            detail: None,
        }
    }

    pub fn with_principal(mut self, principal: &Principal) -> Self {
        self.principal_kind = Some(principal.kind);
        self.identifier = Some(principal.identifier.clone());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_quota(mut self, status: &QuotaStatus) -> Self {
        self.limit = Some(status.limit);
        self.reset = Some(status.reset);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Appends audit events to a JSONL file
#[derive(Clone, Default)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
}

#[derive(Default)]
struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AuditLogger {
    /// Logger that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Logger appending to `path`, creating the file if needed
    pub fn to_file(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Audit logging to {}", path.display());

        Ok(Self {
            inner: Arc::new(Mutex::new(AuditLoggerInner {
                writer: Some(BufWriter::new(file)),
                path: Some(path.to_path_buf()),
            })),
        })
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, event: AuditEvent) {
        let mut inner = self.inner.lock().await;
        let Some(writer) = inner.writer.as_mut() else {
            return;
        };

        let line = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        if let Err(e) = writeln!(writer, "{}", line) {
            error!("Failed to write audit event: {}", e);
        }
        if let Err(e) = writer.flush() {
            error!("Failed to flush audit log: {}", e);
        }
    }
}
