//! Per-request principal resolution
//!
//! Order of precedence:
//! 1. `X-API-Key`: must match a stored key, otherwise the request carries an
//!    `Unauthorized` error (a wrong key is never silently downgraded)
//! 2. `Authorization` bearer token, checked by the active `AuthProvider`;
//!    a failed token falls back to anonymous without an error
//! 3. anonymous, identified by client IP

use hyper::header::{HeaderMap, AUTHORIZATION};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::api_key::api_key_lookup_prefix;
use crate::auth::jwt::extract_token_from_header;
use crate::auth::password::verify_secret;
use crate::auth::principal::Principal;
use crate::auth::provider::AuthProvider;
use crate::db::schemas::ApiKeyDoc;
use crate::db::CredentialStore;
use crate::logging::{AuditEvent, AuditEventType, AuditLogger};
use crate::types::{GateError, Result};

/// Header carrying an API key
pub const API_KEY_HEADER: &str = "x-api-key";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Outcome of resolving a request
///
/// `principal` is always usable. `error` is set when the caller presented a
/// credential that must not be ignored (a bad API key) or when storage failed.
#[derive(Debug)]
pub struct Resolution {
    pub principal: Principal,
    pub error: Option<GateError>,
}

impl Resolution {
    fn ok(principal: Principal) -> Self {
        Self {
            principal,
            error: None,
        }
    }

    fn failed(principal: Principal, error: GateError) -> Self {
        Self {
            principal,
            error: Some(error),
        }
    }

    /// The principal, or the error if one was raised
    pub fn into_result(self) -> Result<Principal> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.principal),
        }
    }
}

/// Client address: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// transport peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get(REAL_IP)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Turns request headers into a `Principal`
#[derive(Clone)]
pub struct PrincipalResolver {
    provider: AuthProvider,
    store: Arc<dyn CredentialStore>,
    audit: AuditLogger,
}

impl PrincipalResolver {
    pub fn new(provider: AuthProvider, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            provider,
            store,
            audit: AuditLogger::disabled(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn provider(&self) -> &AuthProvider {
        &self.provider
    }

    pub async fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Resolution {
        let ip = client_ip(headers, peer);

        if let Some(value) = headers.get(API_KEY_HEADER) {
            let presented = value.to_str().unwrap_or_default().trim();
            return match self.find_api_key(presented).await {
                Ok(Some(key)) => {
                    let principal = Principal::service_key(key.id, key.owner_user_id, key.scopes);
                    debug!(key_id = %principal.identifier, "Request authenticated by API key");
                    self.audit
                        .log(AuditEvent::new(AuditEventType::Authenticated).with_principal(&principal))
                        .await;
                    Resolution::ok(principal)
                }
                Ok(None) => {
                    debug!(client_ip = %ip, "API key rejected");
                    self.audit
                        .log(AuditEvent::new(AuditEventType::ApiKeyRejected).with_identifier(&ip))
                        .await;
                    Resolution::failed(
                        Principal::anonymous(ip),
                        GateError::Unauthorized("Invalid API key".into()),
                    )
                }
                Err(e) => {
                    warn!("API key lookup failed: {}", e);
                    Resolution::failed(Principal::anonymous(ip), e)
                }
            };
        }

        let auth_header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if let Some(token) = extract_token_from_header(auth_header) {
            match self.provider.authenticate(token).await {
                Ok(subject) => {
                    let principal = Principal::user(subject);
                    self.audit
                        .log(AuditEvent::new(AuditEventType::Authenticated).with_principal(&principal))
                        .await;
                    return Resolution::ok(principal);
                }
                Err(e) => {
                    match &e {
                        GateError::Provider(_) => warn!("Identity provider unavailable: {}", e),
                        _ => debug!("Bearer token rejected: {}", e),
                    }
                    self.audit
                        .log(
                            AuditEvent::new(AuditEventType::AnonymousFallback)
                                .with_identifier(&ip)
                                .with_detail(e.to_string()),
                        )
                        .await;
                }
            }
        }

        Resolution::ok(Principal::anonymous(ip))
    }

    /// Stored key matching the presented plaintext, if any
    async fn find_api_key(&self, presented: &str) -> Result<Option<ApiKeyDoc>> {
        let Some(prefix) = api_key_lookup_prefix(presented) else {
            return Ok(None);
        };

        for candidate in self.store.find_api_keys_by_prefix(prefix).await? {
            let secret = presented.to_string();
            let hash = candidate.secret_hash.clone();
            let verified =
                tokio::task::spawn_blocking(move || verify_secret(&secret, &hash)).await?;

            match verified {
                Ok(true) => return Ok(Some(candidate)),
                Ok(false) => {}
                Err(e) if e.is_hash_error() => {
                    warn!(key_id = %candidate.id, "Stored API key hash is unusable: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::api_key::ApiKeyService;
    use crate::auth::jwt::{sign_token, JwtConfig};
    use crate::auth::password::{HashParams, SecretHasher};
    use crate::auth::principal::PrincipalKind;
    use crate::db::schemas::UserDoc;
    use crate::db::MemoryCredentialStore;
    use async_trait::async_trait;
    use hyper::header::HeaderValue;
    use std::collections::BTreeSet;

    fn light_hasher() -> SecretHasher {
        SecretHasher::new(HashParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
            output_len: 32,
        })
    }

    fn jwt() -> JwtConfig {
        JwtConfig::hs256("resolver-test-secret")
    }

    fn setup() -> (PrincipalResolver, ApiKeyService, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let resolver = PrincipalResolver::new(AuthProvider::Local { jwt: jwt() }, store.clone());
        let keys = ApiKeyService::new(store.clone()).with_hasher(light_hasher());
        (resolver, keys, store)
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:5555".parse().unwrap())
    }

    #[test]
    fn test_client_ip_order() {
        let h = headers(&[
            ("x-forwarded-for", " 203.0.113.1 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&h, peer()), "203.0.113.1");

        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&h, peer()), "198.51.100.2");

        let h = headers(&[("x-forwarded-for", " ,10.0.0.1"), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&h, peer()), "198.51.100.2");

        assert_eq!(client_ip(&HeaderMap::new(), peer()), "192.0.2.10");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[tokio::test]
    async fn test_api_key_resolves_to_service_key() {
        let (resolver, keys, _) = setup();
        let created = keys
            .create(&Principal::user("owner-1"), "ci", ["read_urls"])
            .await
            .unwrap();

        let resolution = resolver
            .resolve(&headers(&[("x-api-key", &created.secret)]), peer())
            .await;
        assert!(resolution.error.is_none());
        let principal = resolution.principal;
        assert_eq!(principal.kind, PrincipalKind::ServiceKey);
        assert_eq!(principal.identifier, created.id);
        assert_eq!(principal.owner_user_id.as_deref(), Some("owner-1"));
        assert_eq!(principal.scopes, BTreeSet::from(["read_urls".to_string()]));
    }

    #[tokio::test]
    async fn test_wrong_api_key_is_unauthorized() {
        let (resolver, keys, _) = setup();
        let created = keys
            .create(&Principal::user("owner-1"), "ci", ["read_urls"])
            .await
            .unwrap();

        // Same lookup prefix, different tail
        let mut forged = created.secret.clone();
        let last = forged.pop().unwrap();
        forged.push(if last == 'A' { 'B' } else { 'A' });

        for bad in [forged.as_str(), "lg_nothing-like-it-0000000000", "not-a-key"] {
            let resolution = resolver.resolve(&headers(&[("x-api-key", bad)]), peer()).await;
            assert!(resolution.principal.is_anonymous());
            assert!(matches!(resolution.error, Some(GateError::Unauthorized(_))));
        }
    }

    #[tokio::test]
    async fn test_api_key_wins_over_bearer() {
        let (resolver, _, _) = setup();
        let token = sign_token("user-1", &jwt()).unwrap();
        let auth = format!("Bearer {token}");
        let resolution = resolver
            .resolve(
                &headers(&[("authorization", &auth), ("x-api-key", "lg_bogus-bogus-bogus")]),
                peer(),
            )
            .await;
        assert!(matches!(resolution.error, Some(GateError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_corrupt_hash_is_no_match() {
        let (resolver, keys, store) = setup();
        let created = keys
            .create(&Principal::user("owner-1"), "ci", ["read_urls"])
            .await
            .unwrap();

        let prefix = api_key_lookup_prefix(&created.secret).unwrap().to_string();
        store
            .insert_api_key(ApiKeyDoc::new(
                "$argon2i$v=19$m=1024,t=1,p=1$c2FsdHNhbHQ$aGFzaGhhc2g".into(),
                prefix,
                "corrupt".into(),
                "owner-2".into(),
                BTreeSet::from(["write_urls".to_string()]),
            ))
            .await
            .unwrap();

        // The healthy key still resolves despite the corrupt sibling
        let resolution = resolver
            .resolve(&headers(&[("x-api-key", &created.secret)]), peer())
            .await;
        assert_eq!(resolution.into_result().unwrap().identifier, created.id);
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let (resolver, _, store) = setup();
        let user = UserDoc::new("a@example.com".into(), "x".into());
        let id = user.id.clone();
        store.insert_user(user).await.unwrap();

        let token = sign_token(&id, &jwt()).unwrap();
        let auth = format!("Bearer {token}");
        let principal = resolver
            .resolve(&headers(&[("authorization", &auth)]), peer())
            .await
            .into_result()
            .unwrap();
        assert_eq!(principal, Principal::user(id));
    }

    #[tokio::test]
    async fn test_lowercase_bearer_scheme() {
        let (resolver, _, _) = setup();
        let token = sign_token("user-lower", &jwt()).unwrap();
        let auth = format!("bearer {token}");
        let principal = resolver
            .resolve(&headers(&[("authorization", &auth)]), peer())
            .await
            .into_result()
            .unwrap();
        assert_eq!(principal, Principal::user("user-lower".to_string()));
    }

    #[tokio::test]
    async fn test_bad_bearer_falls_back_silently() {
        let (resolver, _, _) = setup();
        let foreign = sign_token("user-1", &JwtConfig::hs256("other-secret")).unwrap();
        let auth = format!("Bearer {foreign}");
        let resolution = resolver
            .resolve(
                &headers(&[("authorization", &auth), ("x-real-ip", "198.51.100.9")]),
                peer(),
            )
            .await;
        assert!(resolution.error.is_none());
        assert_eq!(resolution.principal, Principal::anonymous("198.51.100.9"));
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let (resolver, _, _) = setup();
        let resolution = resolver.resolve(&HeaderMap::new(), peer()).await;
        assert!(resolution.error.is_none());
        assert_eq!(resolution.principal, Principal::anonymous("192.0.2.10"));
    }

    struct BrokenStore;

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn find_user(&self, _: &str) -> Result<Option<UserDoc>> {
            Err(GateError::Storage("down".into()))
        }
        async fn find_user_by_email(&self, _: &str) -> Result<Option<UserDoc>> {
            Err(GateError::Storage("down".into()))
        }
        async fn insert_user(&self, _: UserDoc) -> Result<()> {
            Err(GateError::Storage("down".into()))
        }
        async fn set_user_plan(&self, _: &str, _: &str) -> Result<bool> {
            Err(GateError::Storage("down".into()))
        }
        async fn insert_api_key(&self, _: ApiKeyDoc) -> Result<()> {
            Err(GateError::Storage("down".into()))
        }
        async fn find_api_keys_by_prefix(&self, _: &str) -> Result<Vec<ApiKeyDoc>> {
            Err(GateError::Storage("down".into()))
        }
        async fn list_api_keys(&self, _: &str) -> Result<Vec<ApiKeyDoc>> {
            Err(GateError::Storage("down".into()))
        }
        async fn delete_api_key(&self, _: &str, _: &str) -> Result<bool> {
            Err(GateError::Storage("down".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let resolver =
            PrincipalResolver::new(AuthProvider::Local { jwt: jwt() }, Arc::new(BrokenStore));
        let resolution = resolver
            .resolve(
                &headers(&[("x-api-key", "lg_abcdefghijklmnopqrstuvwxyz")]),
                peer(),
            )
            .await;
        assert!(resolution.principal.is_anonymous());
        assert!(matches!(resolution.error, Some(GateError::Storage(_))));
    }
}
