//! API keys for programmatic access
//!
//! A key is `lg_` followed by 43 characters of unpadded URL-safe base64
//! (32 random bytes). The plaintext is shown once at creation; the store keeps
//! the argon2 hash plus the first characters of the random part as a lookup
//! index.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::auth::password::SecretHasher;
use crate::auth::principal::{Principal, PrincipalKind};
use crate::auth::scopes::validate_scopes;
use crate::db::schemas::ApiKeyDoc;
use crate::db::CredentialStore;
use crate::logging::{AuditEvent, AuditEventType, AuditLogger};
use crate::types::{GateError, Result};

/// Prefix of every plaintext key
pub const API_KEY_PREFIX: &str = "lg_";

/// Characters of the random part stored as the lookup index
pub const LOOKUP_PREFIX_LEN: usize = 12;

const SECRET_BYTES: usize = 32;

/// Generate a new plaintext API key
pub fn generate_api_key_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Lookup index of a presented key, `None` if it can't be one of ours
pub fn api_key_lookup_prefix(secret: &str) -> Option<&str> {
    secret
        .strip_prefix(API_KEY_PREFIX)?
        .get(..LOOKUP_PREFIX_LEN)
        .filter(|p| p.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'))
}

/// Returned once when a key is created
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    pub id: String,
    pub name: String,
    /// Plaintext key; never retrievable again
    pub secret: String,
    pub scopes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// Key listing entry (no secret material)
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeySummary {
    pub id: String,
    pub name: String,
    pub scopes: BTreeSet<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyDoc> for ApiKeySummary {
    fn from(doc: ApiKeyDoc) -> Self {
        Self {
            created_at: doc.metadata.created_at_utc(),
            id: doc.id,
            name: doc.name,
            scopes: doc.scopes,
        }
    }
}

/// Create, list and delete API keys on behalf of a user
#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn CredentialStore>,
    hasher: SecretHasher,
    audit: AuditLogger,
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            hasher: SecretHasher::default(),
            audit: AuditLogger::disabled(),
        }
    }

    pub fn with_hasher(mut self, hasher: SecretHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub async fn create<I, S>(
        &self,
        principal: &Principal,
        name: &str,
        scopes: I,
    ) -> Result<CreatedApiKey>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owner = owning_user(principal)?;
        let scopes = validate_scopes(scopes)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(GateError::BadRequest("API key name must not be empty".into()));
        }

        let secret = generate_api_key_secret();
        let lookup_prefix = api_key_lookup_prefix(&secret)
            .ok_or_else(|| GateError::Internal("Generated key has no lookup prefix".into()))?
            .to_string();

        let hasher = self.hasher;
        let to_hash = secret.clone();
        let secret_hash = tokio::task::spawn_blocking(move || hasher.hash(&to_hash)).await??;

        let doc = ApiKeyDoc::new(
            secret_hash,
            lookup_prefix,
            name.to_string(),
            owner.to_string(),
            scopes.clone(),
        );
        let id = doc.id.clone();
        let created_at = doc.metadata.created_at_utc().unwrap_or_else(Utc::now);
        self.store.insert_api_key(doc).await?;

        info!(key_id = %id, owner = %owner, "API key created");
        self.audit
            .log(
                AuditEvent::new(AuditEventType::ApiKeyCreated)
                    .with_principal(principal)
                    .with_detail(id.clone()),
            )
            .await;

        Ok(CreatedApiKey {
            id,
            name: name.to_string(),
            secret,
            scopes,
            created_at,
        })
    }

    pub async fn list(&self, principal: &Principal) -> Result<Vec<ApiKeySummary>> {
        let owner = owning_user(principal)?;
        let keys = self.store.list_api_keys(owner).await?;
        Ok(keys.into_iter().map(ApiKeySummary::from).collect())
    }

    /// Delete one of the caller's keys; `NotFound` for unknown or foreign ids
    pub async fn delete(&self, principal: &Principal, key_id: &str) -> Result<()> {
        let owner = owning_user(principal)?;
        if !self.store.delete_api_key(owner, key_id).await? {
            return Err(GateError::NotFound(format!("API key {key_id}")));
        }

        info!(key_id = %key_id, owner = %owner, "API key deleted");
        self.audit
            .log(
                AuditEvent::new(AuditEventType::ApiKeyDeleted)
                    .with_principal(principal)
                    .with_detail(key_id),
            )
            .await;
        Ok(())
    }
}

/// Only signed-in users manage keys; a key can't mint or revoke keys
fn owning_user(principal: &Principal) -> Result<&str> {
    match principal.kind {
        PrincipalKind::User => Ok(&principal.identifier),
        PrincipalKind::Anonymous => {
            Err(GateError::Unauthorized("Authentication required".into()))
        }
        PrincipalKind::ServiceKey => Err(GateError::Forbidden(
            "API keys cannot manage API keys".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::HashParams;
    use crate::db::MemoryCredentialStore;

    fn service() -> ApiKeyService {
        ApiKeyService::new(Arc::new(MemoryCredentialStore::new())).with_hasher(
            SecretHasher::new(HashParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
                output_len: 32,
            }),
        )
    }

    #[test]
    fn test_secret_shape() {
        let a = generate_api_key_secret();
        let b = generate_api_key_secret();
        assert_ne!(a, b);
        assert!(a.starts_with(API_KEY_PREFIX));
        assert_eq!(a.len(), API_KEY_PREFIX.len() + 43);
        assert!(!a.contains('='));
        assert!(!a[API_KEY_PREFIX.len()..].contains('+'));
        assert!(!a[API_KEY_PREFIX.len()..].contains('/'));
    }

    #[test]
    fn test_lookup_prefix() {
        let secret = generate_api_key_secret();
        let prefix = api_key_lookup_prefix(&secret).unwrap();
        assert_eq!(prefix.len(), LOOKUP_PREFIX_LEN);
        assert_eq!(&secret[3..15], prefix);

        assert!(api_key_lookup_prefix("sk_abcdefghijklmnop").is_none());
        assert!(api_key_lookup_prefix("lg_short").is_none());
        assert!(api_key_lookup_prefix("lg_abc def ghijkl").is_none());
        assert!(api_key_lookup_prefix("").is_none());
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let svc = service();
        let user = Principal::user("user-1");

        let created = svc
            .create(&user, "deploy bot", ["write_urls", "read_urls"])
            .await
            .unwrap();
        assert!(created.secret.starts_with(API_KEY_PREFIX));
        assert_eq!(created.scopes.len(), 2);

        let listed = svc.list(&user).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].name, "deploy bot");

        assert!(svc.list(&Principal::user("user-2")).await.unwrap().is_empty());
        assert!(matches!(
            svc.delete(&Principal::user("user-2"), &created.id).await,
            Err(GateError::NotFound(_))
        ));

        svc.delete(&user, &created.id).await.unwrap();
        assert!(svc.list(&user).await.unwrap().is_empty());
        assert!(matches!(
            svc.delete(&user, &created.id).await,
            Err(GateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_requires_user() {
        let svc = service();
        assert!(matches!(
            svc.create(&Principal::anonymous("1.1.1.1"), "x", ["read_urls"])
                .await,
            Err(GateError::Unauthorized(_))
        ));
        let key = Principal::service_key("k", "user-1", BTreeSet::new());
        assert!(matches!(
            svc.create(&key, "x", ["read_urls"]).await,
            Err(GateError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let svc = service();
        let user = Principal::user("user-1");
        assert!(matches!(
            svc.create(&user, "x", ["everything"]).await,
            Err(GateError::BadRequest(_))
        ));
        assert!(matches!(
            svc.create(&user, "   ", ["read_urls"]).await,
            Err(GateError::BadRequest(_))
        ));
    }
}
