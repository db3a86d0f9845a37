//! Bearer-token validation strategies
//!
//! Exactly one mode is active per deployment:
//! - `local`: this service signs and verifies its own tokens
//! - `external-jwt`: tokens are minted elsewhere, verified here with a shared
//!   secret or public key
//! - `delegated`: an external identity provider verifies the session
//!
//! Settings are checked once at startup; a misconfigured mode is fatal.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::clerk::ClerkProvider;
use crate::auth::jwt::{sign_token, verify_token, JwtAlgorithm, JwtConfig};
use crate::types::{GateError, Result};

/// Active authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Local,
    ExternalJwt,
    Delegated,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Local => write!(f, "local"),
            AuthMode::ExternalJwt => write!(f, "external-jwt"),
            AuthMode::Delegated => write!(f, "delegated"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = GateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(AuthMode::Local),
            "external-jwt" | "external_jwt" | "external" => Ok(AuthMode::ExternalJwt),
            "delegated" | "clerk" => Ok(AuthMode::Delegated),
            other => Err(GateError::Config(format!("Unknown auth mode: {other}"))),
        }
    }
}

/// Credentials and endpoint of the delegated identity provider
#[derive(Clone)]
pub struct ClerkConfig {
    pub publishable_key: String,
    pub secret_key: String,
    pub api_url: String,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// How long a fetched key set is trusted before refetching
    pub jwks_ttl: Duration,
}

impl fmt::Debug for ClerkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClerkConfig")
            .field("publishable_key", &self.publishable_key)
            .field("secret_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .field("jwks_ttl", &self.jwks_ttl)
            .finish()
    }
}

impl ClerkConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.clerk.com";

    pub fn new(publishable_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            publishable_key: publishable_key.into(),
            secret_key: secret_key.into(),
            api_url: Self::DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(5),
            jwks_ttl: Duration::from_secs(3600),
        }
    }
}

/// Everything needed to build the active provider
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub mode: AuthMode,
    pub jwt: Option<JwtConfig>,
    pub clerk: Option<ClerkConfig>,
}

impl AuthSettings {
    pub fn local(jwt: JwtConfig) -> Self {
        Self {
            mode: AuthMode::Local,
            jwt: Some(jwt),
            clerk: None,
        }
    }

    pub fn external_jwt(jwt: JwtConfig) -> Self {
        Self {
            mode: AuthMode::ExternalJwt,
            jwt: Some(jwt),
            clerk: None,
        }
    }

    pub fn delegated(clerk: ClerkConfig) -> Self {
        Self {
            mode: AuthMode::Delegated,
            jwt: None,
            clerk: Some(clerk),
        }
    }

    /// Check that the active mode has usable key material
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            AuthMode::Local => {
                let jwt = self.require_jwt()?;
                // Both halves are parsed now so a bad PEM fails at startup
                jwt.decoding_key()?;
                jwt.encoding_key()?;
                if jwt.algorithm == JwtAlgorithm::Hs256 {
                    require_non_empty_secret(jwt)?;
                }
            }
            AuthMode::ExternalJwt => {
                let jwt = self.require_jwt()?;
                if jwt.private_key.is_some() {
                    return Err(GateError::Config(
                        "external-jwt mode only verifies tokens; remove JWT_PRIVATE_KEY".into(),
                    ));
                }
                jwt.decoding_key()?;
                if jwt.algorithm == JwtAlgorithm::Hs256 {
                    require_non_empty_secret(jwt)?;
                }
            }
            AuthMode::Delegated => {
                let clerk = self.clerk.as_ref().ok_or_else(|| {
                    GateError::Config("delegated mode requires identity provider keys".into())
                })?;
                if !clerk.publishable_key.starts_with("pk_") {
                    return Err(GateError::Config(
                        "CLERK_PUBLISHABLE_KEY must start with pk_".into(),
                    ));
                }
                if !clerk.secret_key.starts_with("sk_") {
                    return Err(GateError::Config(
                        "CLERK_SECRET_KEY must start with sk_".into(),
                    ));
                }
                if clerk.api_url.is_empty() {
                    return Err(GateError::Config("CLERK_API_URL is empty".into()));
                }
            }
        }
        Ok(())
    }

    fn require_jwt(&self) -> Result<&JwtConfig> {
        self.jwt
            .as_ref()
            .ok_or_else(|| GateError::Config(format!("{} mode requires JWT settings", self.mode)))
    }
}

fn require_non_empty_secret(jwt: &JwtConfig) -> Result<()> {
    match jwt.secret_key.as_deref() {
        Some(s) if !s.is_empty() => Ok(()),
        _ => Err(GateError::Config("HS256 requires JWT_SECRET".into())),
    }
}

/// Result of a delegated session check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedSession {
    pub signed_in: bool,
    /// Provider-side user id; empty when not signed in
    pub subject: String,
}

/// External service that can vouch for a session token
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_session(&self, token: &str) -> Result<DelegatedSession>;
}

/// The configured token validation strategy
#[derive(Clone)]
pub enum AuthProvider {
    Local { jwt: JwtConfig },
    ExternalJwt { jwt: JwtConfig },
    Delegated { provider: Arc<dyn IdentityProvider> },
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProvider::Local { jwt } => f.debug_struct("Local").field("jwt", jwt).finish(),
            AuthProvider::ExternalJwt { jwt } => {
                f.debug_struct("ExternalJwt").field("jwt", jwt).finish()
            }
            AuthProvider::Delegated { .. } => f.write_str("Delegated"),
        }
    }
}

impl AuthProvider {
    /// Validate settings and build the provider for the active mode
    pub fn from_settings(settings: &AuthSettings) -> Result<Self> {
        settings.validate()?;

        match settings.mode {
            AuthMode::Local => Ok(AuthProvider::Local {
                jwt: settings.require_jwt()?.clone(),
            }),
            AuthMode::ExternalJwt => Ok(AuthProvider::ExternalJwt {
                jwt: settings.require_jwt()?.clone(),
            }),
            AuthMode::Delegated => {
                let clerk = settings.clerk.clone().ok_or_else(|| {
                    GateError::Config("delegated mode requires identity provider keys".into())
                })?;
                Ok(AuthProvider::Delegated {
                    provider: Arc::new(ClerkProvider::new(clerk)?),
                })
            }
        }
    }

    pub fn mode(&self) -> AuthMode {
        match self {
            AuthProvider::Local { .. } => AuthMode::Local,
            AuthProvider::ExternalJwt { .. } => AuthMode::ExternalJwt,
            AuthProvider::Delegated { .. } => AuthMode::Delegated,
        }
    }

    /// Verify a bearer token and return the user id it names
    pub async fn authenticate(&self, token: &str) -> Result<String> {
        match self {
            AuthProvider::Local { jwt } | AuthProvider::ExternalJwt { jwt } => {
                verify_token(token, jwt)
            }
            AuthProvider::Delegated { provider } => {
                let session = provider.verify_session(token).await?;
                if session.signed_in && !session.subject.is_empty() {
                    Ok(session.subject)
                } else {
                    Err(GateError::Unauthorized("Session is not signed in".into()))
                }
            }
        }
    }

    /// Sign a token for `subject`; only the local mode mints tokens
    pub fn issue_token(&self, subject: &str) -> Result<String> {
        match self {
            AuthProvider::Local { jwt } => sign_token(subject, jwt),
            other => Err(GateError::Config(format!(
                "Tokens are not issued in {} mode",
                other.mode()
            ))),
        }
    }
}
