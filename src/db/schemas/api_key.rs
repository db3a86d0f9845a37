//! API Key document schema
//!
//! Stores API keys for programmatic access. Only the argon2 hash of the
//! secret is kept; `lookup_prefix` is a non-secret slice of the key used to
//! find the candidate document before verifying the hash.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for API keys
pub const API_KEY_COLLECTION: &str = "api_keys";

/// A stored service key; the plaintext is never persisted
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ApiKeyDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// argon2id PHC string of the full key
    pub secret_hash: String,

    /// First characters of the key body, indexed for candidate lookup
    pub lookup_prefix: String,

    pub name: String,

    pub owner_user_id: String,

    /// Scope names as stored; unknown names grant nothing
    pub scopes: BTreeSet<String>,
}

impl ApiKeyDoc {
    pub fn new(
        secret_hash: String,
        lookup_prefix: String,
        name: String,
        owner_user_id: String,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            secret_hash,
            lookup_prefix,
            name,
            owner_user_id,
            scopes,
        }
    }
}

impl IntoIndexes for ApiKeyDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "lookup_prefix": 1 },
                Some(IndexOptions::builder().name("api_keys_lookup".to_string()).build()),
            ),
            (
                doc! { "owner_user_id": 1, "metadata.created_at": 1 },
                Some(IndexOptions::builder().name("api_keys_by_owner".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for ApiKeyDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
