//! Clerk session verification
//!
//! Session tokens are RS256 JWTs signed with the instance's keys. The key set
//! is fetched from the backend API with the secret key and cached; a token
//! naming an unknown `kid` forces one refetch, rate limited so random key ids
//! can't be used to hammer the API.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::provider::{ClerkConfig, DelegatedSession, IdentityProvider};
use crate::types::{GateError, Result};

/// Minimum gap between forced key set refreshes
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Identity provider backed by the Clerk backend API
pub struct ClerkProvider {
    config: ClerkConfig,
    http_client: reqwest::Client,
    jwks: RwLock<Option<CachedJwks>>,
}

impl ClerkProvider {
    pub fn new(config: ClerkConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("linkgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GateError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            jwks: RwLock::new(None),
        })
    }

    fn jwks_url(&self) -> String {
        format!("{}/v1/jwks", self.config.api_url.trim_end_matches('/'))
    }

    async fn fetch_jwks(&self) -> Result<JwkSet> {
        let url = self.jwks_url();
        debug!(url = %url, "Fetching identity provider key set");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| GateError::Provider(format!("Key set request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Provider(format!(
                "Key set request returned {}",
                status
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| GateError::Provider(format!("Invalid key set: {}", e)))?;

        info!(keys = keys.keys.len(), "Identity provider key set refreshed");
        Ok(keys)
    }

    /// Decoding key for `kid`, refreshing the cached set when needed
    async fn key_for(&self, kid: Option<&str>) -> Result<Option<DecodingKey>> {
        {
            let cache = self.jwks.read().await;
            if let Some(cached) = cache.as_ref() {
                let fresh = cached.fetched_at.elapsed() < self.config.jwks_ttl;
                if let Some(key) = find_key(&cached.keys, kid)? {
                    if fresh {
                        return Ok(Some(key));
                    }
                } else if cached.fetched_at.elapsed() < MIN_REFRESH_INTERVAL {
                    return Ok(None);
                }
            }
        }

        let mut cache = self.jwks.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < MIN_REFRESH_INTERVAL {
                return find_key(&cached.keys, kid);
            }
        }

        let keys = self.fetch_jwks().await?;
        let key = find_key(&keys, kid)?;
        *cache = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(key)
    }
}

fn find_key(keys: &JwkSet, kid: Option<&str>) -> Result<Option<DecodingKey>> {
    let jwk = match kid {
        Some(kid) => keys.find(kid),
        // Without a kid only an unambiguous single-key set is usable
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    };

    jwk.map(|jwk| {
        DecodingKey::from_jwk(jwk)
            .map_err(|e| GateError::Provider(format!("Unusable key in key set: {}", e)))
    })
    .transpose()
}

fn signed_out() -> DelegatedSession {
    DelegatedSession {
        signed_in: false,
        subject: String::new(),
    }
}

#[async_trait]
impl IdentityProvider for ClerkProvider {
    async fn verify_session(&self, token: &str) -> Result<DelegatedSession> {
        let header = match decode_header(token) {
            Ok(h) => h,
            Err(e) => {
                debug!("Session token header unreadable: {}", e);
                return Ok(signed_out());
            }
        };
        if header.alg != Algorithm::RS256 {
            debug!(alg = ?header.alg, "Session token uses an unexpected algorithm");
            return Ok(signed_out());
        }

        let Some(key) = self.key_for(header.kid.as_deref()).await? else {
            warn!(kid = ?header.kid, "Session token signed with unknown key");
            return Ok(signed_out());
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_nbf = true;
        validation.validate_aud = false;

        match decode::<SessionClaims>(token, &key, &validation) {
            Ok(data) if !data.claims.sub.is_empty() => Ok(DelegatedSession {
                signed_in: true,
                subject: data.claims.sub,
            }),
            Ok(_) => Ok(signed_out()),
            Err(e) => {
                debug!("Session token rejected: {}", e);
                Ok(signed_out())
            }
        }
    }
}
