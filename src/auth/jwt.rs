//! JWT token handling for bearer authentication
//!
//! Tokens carry a single `sub` claim. Verification checks the signature only;
//! there is no expiry, issuer or audience validation.
//!
//! Supported algorithms:
//! - HS256 with a shared secret
//! - RS256 with PEM keys (private key in PKCS#1 or PKCS#8 form)

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::GateError;

/// Payload stored in a JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
}

/// Signing algorithm for bearer tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    Hs256,
    Rs256,
}

impl JwtAlgorithm {
    fn as_jsonwebtoken(self) -> Algorithm {
        match self {
            JwtAlgorithm::Hs256 => Algorithm::HS256,
            JwtAlgorithm::Rs256 => Algorithm::RS256,
        }
    }
}

impl fmt::Display for JwtAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JwtAlgorithm::Hs256 => write!(f, "HS256"),
            JwtAlgorithm::Rs256 => write!(f, "RS256"),
        }
    }
}

impl FromStr for JwtAlgorithm {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(JwtAlgorithm::Hs256),
            "RS256" => Ok(JwtAlgorithm::Rs256),
            "" => Err(GateError::Config("JWT algorithm is not set".into())),
            other => Err(GateError::Config(format!(
                "Unsupported JWT algorithm: {other}"
            ))),
        }
    }
}

/// Key material for signing and verifying bearer tokens
///
/// Built once at startup and passed to whatever needs it.
#[derive(Clone)]
pub struct JwtConfig {
    pub algorithm: JwtAlgorithm,
    pub secret_key: Option<String>,
    pub public_key: Option<String>,
    pub private_key: Option<String>,
}

// Key material stays out of debug output.
impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("algorithm", &self.algorithm)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("public_key", &self.public_key.as_ref().map(|_| "<pem>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl JwtConfig {
    pub fn hs256(secret: impl Into<String>) -> Self {
        Self {
            algorithm: JwtAlgorithm::Hs256,
            secret_key: Some(secret.into()),
            public_key: None,
            private_key: None,
        }
    }

    pub fn rs256(public_key: Option<String>, private_key: Option<String>) -> Self {
        Self {
            algorithm: JwtAlgorithm::Rs256,
            secret_key: None,
            public_key,
            private_key,
        }
    }

    /// Build a config from raw settings, rejecting an unset or unknown algorithm
    pub fn from_parts(
        algorithm: Option<&str>,
        secret_key: Option<String>,
        public_key: Option<String>,
        private_key: Option<String>,
    ) -> Result<Self, GateError> {
        let algorithm = algorithm
            .ok_or_else(|| GateError::Config("JWT algorithm is not set".into()))?
            .parse()?;

        Ok(Self {
            algorithm,
            secret_key: secret_key.filter(|s| !s.is_empty()),
            public_key: public_key.filter(|s| !s.is_empty()),
            private_key: private_key.filter(|s| !s.is_empty()),
        })
    }

    /// Key used to sign tokens
    pub fn encoding_key(&self) -> Result<EncodingKey, GateError> {
        match self.algorithm {
            JwtAlgorithm::Hs256 => {
                let secret = self.secret_key.as_deref().ok_or_else(|| {
                    GateError::Config("HS256 requires a secret key".into())
                })?;
                Ok(EncodingKey::from_secret(secret.as_bytes()))
            }
            JwtAlgorithm::Rs256 => {
                let pem = self.private_key.as_deref().ok_or_else(|| {
                    GateError::Config("RS256 signing requires a private key".into())
                })?;
                // jsonwebtoken detects PKCS#1 vs PKCS#8 from the PEM label.
                EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| GateError::Crypto(format!("Invalid RSA private key: {e}")))
            }
        }
    }

    /// Key used to verify tokens
    pub fn decoding_key(&self) -> Result<DecodingKey, GateError> {
        match self.algorithm {
            JwtAlgorithm::Hs256 => {
                let secret = self.secret_key.as_deref().ok_or_else(|| {
                    GateError::Config("HS256 requires a secret key".into())
                })?;
                Ok(DecodingKey::from_secret(secret.as_bytes()))
            }
            JwtAlgorithm::Rs256 => {
                let pem = self.public_key.as_deref().ok_or_else(|| {
                    GateError::Config("RS256 verification requires a public key".into())
                })?;
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| GateError::Crypto(format!("Invalid RSA public key: {e}")))
            }
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm.as_jsonwebtoken());
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation
    }
}

/// Sign a token whose only claim is the subject
pub fn sign_token(subject_id: &str, config: &JwtConfig) -> Result<String, GateError> {
    if subject_id.is_empty() {
        return Err(GateError::BadRequest("Token subject must not be empty".into()));
    }

    let key = config.encoding_key()?;
    let header = Header::new(config.algorithm.as_jsonwebtoken());
    let claims = Claims {
        sub: subject_id.to_string(),
    };

    encode(&header, &claims, &key)
        .map_err(|e| GateError::Crypto(format!("Failed to sign token: {e}")))
}

/// Verify a token's signature and return its subject
///
/// Only the signature and algorithm are checked. Any failure, including a
/// missing or empty `sub`, is reported as `InvalidSignature`.
pub fn verify_token(token: &str, config: &JwtConfig) -> Result<String, GateError> {
    let key = config.decoding_key()?;

    let data = decode::<Claims>(token, &key, &config.validation()).map_err(|err| {
        use jsonwebtoken::errors::ErrorKind;
        let reason = match err.kind() {
            ErrorKind::InvalidSignature => "Invalid signature",
            ErrorKind::InvalidAlgorithm => "Algorithm mismatch",
            ErrorKind::InvalidToken => "Invalid token",
            ErrorKind::Json(_) => "Missing subject claim",
            _ => "Token validation failed",
        };
        GateError::InvalidSignature(reason.into())
    })?;

    if data.claims.sub.is_empty() {
        return Err(GateError::InvalidSignature("Empty subject claim".into()));
    }

    Ok(data.claims.sub)
}

/// Extract token from Authorization header.
/// Supports "Bearer <token>" (scheme matched case-insensitively) and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some((scheme, token)) = header.split_once(' ') {
        let token = token.trim();
        if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
            return Some(token);
        }
    }

    // Also support raw token (for flexibility)
    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}
