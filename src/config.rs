//! Configuration for linkgate
//!
//! CLI arguments and environment variable handling using clap. Everything is
//! read once at startup into an immutable `Args` and passed down explicitly.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::jwt::JwtConfig;
use crate::auth::provider::{AuthMode, AuthSettings, ClerkConfig};
use crate::logging::{AuditLogger, LogFormat};
use crate::plans::Plan;
use crate::quota::SubjectType;
use crate::types::GateError;

/// linkgate - authentication, authorization and quota core for a link shortener
#[derive(Parser, Debug, Clone)]
#[command(name = "linkgate")]
#[command(about = "Authentication, authorization and quota enforcement for a link shortener")]
pub struct Args {
    /// Token validation mode (local, external-jwt, delegated)
    #[arg(long, env = "AUTH_MODE", default_value = "local", global = true)]
    pub auth_mode: AuthMode,

    /// Bearer token algorithm (HS256 or RS256)
    #[arg(long, env = "JWT_ALGORITHM", global = true)]
    pub jwt_algorithm: Option<String>,

    /// Shared secret for HS256
    #[arg(long, env = "JWT_SECRET", hide_env_values = true, global = true)]
    pub jwt_secret: Option<String>,

    /// RS256 public key (PEM)
    #[arg(long, env = "JWT_PUBLIC_KEY", hide_env_values = true, allow_hyphen_values = true, global = true)]
    pub jwt_public_key: Option<String>,

    /// RS256 private key (PEM, PKCS#1 or PKCS#8); local mode only
    #[arg(long, env = "JWT_PRIVATE_KEY", hide_env_values = true, allow_hyphen_values = true, global = true)]
    pub jwt_private_key: Option<String>,

    /// Clerk publishable key (pk_...)
    #[arg(long, env = "CLERK_PUBLISHABLE_KEY", global = true)]
    pub clerk_publishable_key: Option<String>,

    /// Clerk secret key (sk_...)
    #[arg(long, env = "CLERK_SECRET_KEY", hide_env_values = true, global = true)]
    pub clerk_secret_key: Option<String>,

    /// Clerk backend API base URL
    #[arg(long, env = "CLERK_API_URL", default_value = "https://api.clerk.com", global = true)]
    pub clerk_api_url: String,

    /// Timeout for identity provider requests in milliseconds
    #[arg(long, env = "PROVIDER_TIMEOUT_MS", default_value = "5000", global = true)]
    pub provider_timeout_ms: u64,

    /// Counter storage backend
    #[arg(long, env = "LEDGER_BACKEND", value_enum, default_value_t = LedgerBackend::Sqlite, global = true)]
    pub ledger_backend: LedgerBackend,

    /// SQLite counter database path
    #[arg(long, env = "SQLITE_PATH", default_value = "linkgate.db", global = true)]
    pub sqlite_path: PathBuf,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017", global = true)]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "linkgate", global = true)]
    pub mongodb_db: String,

    /// How long expired counters are kept, in hours
    #[arg(long, env = "RETENTION_HOURS", default_value = "1488", global = true)]
    pub retention_hours: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format (pretty or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Append auth and quota decisions to this JSONL file
    #[arg(long, env = "AUDIT_LOG", global = true)]
    pub audit_log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Where quota counters live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LedgerBackend {
    /// Local database file; several processes on one host may share it
    Sqlite,
    /// MongoDB replica set shared by every instance
    Mongodb,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate configuration and print the active auth mode
    Check,

    /// Delete quota counters older than the retention period
    Cleanup,

    /// Sign a bearer token for a user id (local mode only)
    IssueToken {
        /// User id placed in the `sub` claim
        subject: String,
    },

    /// Hash a secret read from stdin (for seeding password hashes)
    HashSecret,

    /// List the scopes an API key can be granted
    Scopes,

    /// Show hourly and monthly counters without incrementing them
    QuotaStatus {
        /// Client IP or user id
        identifier: String,

        /// What the identifier is (ip or user)
        #[arg(long = "type", default_value = "ip")]
        subject_type: SubjectType,

        /// Plan whose limits apply
        #[arg(long, default_value = "hobbyist")]
        plan: Plan,
    },
}

impl Args {
    /// Immutable auth settings for the configured mode
    pub fn auth_settings(&self) -> Result<AuthSettings, GateError> {
        match self.auth_mode {
            AuthMode::Local => Ok(AuthSettings::local(self.jwt_config()?)),
            AuthMode::ExternalJwt => Ok(AuthSettings::external_jwt(self.jwt_config()?)),
            AuthMode::Delegated => {
                let publishable = self.clerk_publishable_key.clone().ok_or_else(|| {
                    GateError::Config("CLERK_PUBLISHABLE_KEY is required in delegated mode".into())
                })?;
                let secret = self.clerk_secret_key.clone().ok_or_else(|| {
                    GateError::Config("CLERK_SECRET_KEY is required in delegated mode".into())
                })?;

                let mut clerk = ClerkConfig::new(publishable, secret);
                clerk.api_url = self.clerk_api_url.clone();
                clerk.timeout = Duration::from_millis(self.provider_timeout_ms);
                Ok(AuthSettings::delegated(clerk))
            }
        }
    }

    fn jwt_config(&self) -> Result<JwtConfig, GateError> {
        JwtConfig::from_parts(
            self.jwt_algorithm.as_deref(),
            self.jwt_secret.clone(),
            self.jwt_public_key.as_deref().map(unescape_pem),
            self.jwt_private_key.as_deref().map(unescape_pem),
        )
    }

    pub fn retention(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::hours(i64::try_from(self.retention_hours).unwrap_or(i64::MAX / 3600))
    }

    /// Audit logger for `--audit-log`, or a disabled one
    pub fn audit_logger(&self) -> std::io::Result<AuditLogger> {
        match &self.audit_log {
            Some(path) => AuditLogger::to_file(path),
            None => Ok(AuditLogger::disabled()),
        }
    }

    /// Validate configuration; any error here is fatal at startup
    pub fn validate(&self) -> Result<(), GateError> {
        self.auth_settings()?.validate()?;

        if self.provider_timeout_ms == 0 {
            return Err(GateError::Config("PROVIDER_TIMEOUT_MS must be positive".into()));
        }

        if self.retention_hours < 2 {
            // The previous hour's counters must survive a sweep
            return Err(GateError::Config("RETENTION_HOURS must be at least 2".into()));
        }

        match self.ledger_backend {
            LedgerBackend::Sqlite if self.sqlite_path.as_os_str().is_empty() => {
                Err(GateError::Config("SQLITE_PATH is empty".into()))
            }
            LedgerBackend::Mongodb if self.mongodb_uri.is_empty() || self.mongodb_db.is_empty() => {
                Err(GateError::Config(
                    "MONGODB_URI and MONGODB_DB are required for the mongodb backend".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// PEM keys passed through env files often arrive with literal `\n`
fn unescape_pem(pem: &str) -> String {
    if pem.contains("\\n") && !pem.contains('\n') {
        pem.replace("\\n", "\n")
    } else {
        pem.to_string()
    }
}
